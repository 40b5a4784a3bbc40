// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Encoding session.
//!
//! A [`Session`] owns one component from handle acquisition to release.
//! Opening it loads the core, negotiates both ports, allocates every
//! buffer, brings the component to `Executing` and primes the output port.
//! Frames are then pushed with [`Session::send_frame`] and packets pulled
//! with [`Session::receive_packet`] on the caller's thread while the
//! component works on its own.
//!
//! Teardown is a single idempotent routine. It runs when opening fails at
//! any step, on [`Session::close`] and when the session is dropped, and it
//! only releases what was actually created.
//!
//! # Example
//!
//! ```
//! use omx_encoder::{
//!     frame::{PixelFormat, VideoFrame},
//!     loopback::{LoopbackCore, LoopbackOptions},
//!     Codec, Session, SessionConfig,
//! };
//! use std::sync::Arc;
//!
//! let core = LoopbackCore::new(LoopbackOptions::default());
//! let config = SessionConfig::new(Codec::Hevc, 64, 32);
//! let mut session = Session::open(core, config)?;
//!
//! let frame = VideoFrame::packed(PixelFormat::Nv12, 64, 32, vec![16; 64 * 48])?;
//! session.send_frame(&Arc::new(frame))?;
//! let packet = session.flush()?.expect("one packet");
//! assert!(packet.key);
//! session.close()?;
//! # Ok::<(), omx_encoder::Error>(())
//! ```

use crate::{
    backend::{
        AvcParams, Component, ComponentCallbacks, ControlRate, Core, Direction, ErrorCode,
        HevcParams, Param, ParamKind, PortDefinition, State,
    },
    collect::{OutputCollector, Packet},
    config::{Codec, Rotation, SessionConfig},
    dispatch::{CallbackDispatcher, Shared},
    error::{Error, Result},
    frame::{ImageLayout, VideoFrame},
    loader::ComponentLoader,
    pool::{BufferPool, PoolStats, Wait},
    state::StateMachine,
    submit::{FrameSubmitter, SubmitPath},
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Port parameters as accepted by the component. Fixed for the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedPorts {
    pub input: PortDefinition,
    pub output: PortDefinition,
    /// Plane layout of the input buffers.
    pub layout: ImageLayout,
}

impl NegotiatedPorts {
    pub fn port(&self, direction: Direction) -> &PortDefinition {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    shared: Arc<Shared>,
    loader: Option<ComponentLoader>,
    component: Option<Box<dyn Component>>,
    name: String,
    ports: Option<NegotiatedPorts>,
    pool: BufferPool,
    state: StateMachine,
    allocated: [usize; 2],
    submitter: Option<FrameSubmitter>,
    collector: Option<OutputCollector>,
    torn_down: bool,
}

struct Live<'a> {
    component: &'a dyn Component,
    pool: &'a BufferPool,
    submitter: &'a mut FrameSubmitter,
    collector: &'a mut OutputCollector,
}

impl Session {
    /// Opens a session on a component of `core` and brings it to the
    /// executing state. When `config.global_header` is set this also waits
    /// for the stream configuration.
    ///
    /// # Errors
    ///
    /// Any initialisation failure. Everything created up to that point has
    /// been released when the error is returned.
    #[instrument(skip(core, config), fields(codec = %config.codec, width = config.width, height = config.height))]
    pub fn open(core: Arc<dyn Core>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let shared = Shared::new();
        let mut session = Self {
            config,
            pool: BufferPool::new(shared.clone()),
            state: StateMachine::new(shared.clone()),
            shared,
            loader: None,
            component: None,
            name: String::new(),
            ports: None,
            allocated: [0; 2],
            submitter: None,
            collector: None,
            torn_down: false,
        };
        match session.init(core) {
            Ok(()) => Ok(session),
            Err(err) => {
                error!(%err, "session initialisation failed");
                if let Err(cleanup) = session.teardown() {
                    warn!(%cleanup, "teardown after failed initialisation");
                }
                Err(err)
            }
        }
    }

    fn init(&mut self, core: Arc<dyn Core>) -> Result<()> {
        let role = self.config.codec.role();
        let loader = self.loader.insert(ComponentLoader::load(core, role)?);
        let name = loader.resolve(role, self.config.component_name.as_deref())?;
        info!(component = %name, role, "using component");
        let callbacks: Arc<dyn ComponentCallbacks> =
            Arc::new(CallbackDispatcher::new(self.shared.clone()));
        let component = loader.acquire(&name, callbacks)?;
        self.name = name;
        let component: &dyn Component = &**self.component.insert(component);

        let ports = negotiate(component, &self.config)?;
        info!(
            input = ports.input.index,
            output = ports.output.index,
            stride = ports.input.video.stride,
            slice_height = ports.input.video.slice_height,
            input_buffers = ports.input.buffer_count_actual,
            output_buffers = ports.output.buffer_count_actual,
            "ports negotiated"
        );
        self.ports = Some(ports.clone());

        for direction in Direction::ALL {
            let count = ports.port(direction).buffer_count_actual as usize;
            self.pool.open(direction, count);
        }

        self.state.begin(component, State::Idle)?;
        for direction in Direction::ALL {
            let port = ports.port(direction);
            for _ in 0..port.buffer_count_actual {
                let header = component
                    .allocate_buffer(port.index, port.buffer_size)
                    .map_err(|code| {
                        error!(%direction, %code, size = port.buffer_size, "buffer allocation failed");
                        Error::MemoryExhausted {
                            bytes: port.buffer_size,
                        }
                    })?;
                self.allocated[direction.index()] += 1;
                self.pool.release(direction, header);
            }
        }
        self.state.wait(State::Idle)?;
        self.state.transition(component, State::Executing)?;

        for _ in 0..self.allocated[Direction::Output.index()] {
            let Some(header) = self.pool.acquire(Direction::Output, Wait::Poll)? else {
                break;
            };
            self.pool
                .hand_over(Direction::Output, header, |header| {
                    component.fill_this_buffer(header)
                })
                .map_err(|code| Error::BufferExchangeFailed {
                    op: "fill_this_buffer",
                    direction: Direction::Output,
                    code,
                })?;
        }

        let mut submitter = FrameSubmitter::new(
            ports.layout.clone(),
            ports.output.index,
            self.config.zero_copy,
            self.config.time_base,
        );
        let mut collector = OutputCollector::new(
            self.config.codec,
            self.config.global_header,
            self.config.time_base,
        );
        if self.config.global_header {
            submitter.submit_config_request(component, &self.pool)?;
            collector.await_configuration(component, &self.pool)?;
            info!(
                len = collector.extradata().data().len(),
                "stream configuration collected"
            );
        }
        self.submitter = Some(submitter);
        self.collector = Some(collector);
        Ok(())
    }

    fn live(&mut self) -> Result<Live<'_>> {
        if self.torn_down || self.state.state() != State::Executing {
            return Err(Error::Closed);
        }
        match (
            self.component.as_deref(),
            self.submitter.as_mut(),
            self.collector.as_mut(),
        ) {
            (Some(component), Some(submitter), Some(collector)) => Ok(Live {
                component,
                pool: &self.pool,
                submitter,
                collector,
            }),
            _ => Err(Error::Closed),
        }
    }

    /// Submits one frame, blocking while every input buffer is with the
    /// component.
    pub fn send_frame(&mut self, frame: &Arc<VideoFrame>) -> Result<SubmitPath> {
        let Live {
            component,
            pool,
            submitter,
            ..
        } = self.live()?;
        submitter.submit(component, pool, frame)
    }

    /// Signals end of stream. Returns `false` if it was already sent.
    pub fn send_eos(&mut self) -> Result<bool> {
        let Live {
            component,
            pool,
            submitter,
            ..
        } = self.live()?;
        submitter.submit_eos(component, pool)
    }

    /// Returns a finished packet if one is available without waiting for
    /// the component.
    pub fn receive_packet(&mut self) -> Result<Option<Packet>> {
        let Live {
            component,
            pool,
            collector,
            ..
        } = self.live()?;
        collector.receive_packet(component, pool, false)
    }

    /// Signals end of stream and waits for the next packet. Returns `None`
    /// once every packet has been delivered.
    pub fn flush(&mut self) -> Result<Option<Packet>> {
        let Live {
            component,
            pool,
            submitter,
            collector,
        } = self.live()?;
        submitter.submit_eos(component, pool)?;
        collector.receive_packet(component, pool, true)
    }

    /// Submits `frame` and polls for a packet, or flushes when `frame` is
    /// `None`.
    pub fn encode(&mut self, frame: Option<&Arc<VideoFrame>>) -> Result<Option<Packet>> {
        match frame {
            Some(frame) => {
                self.send_frame(frame)?;
                self.receive_packet()
            }
            None => self.flush(),
        }
    }

    /// Stream configuration collected out of band. Empty unless the session
    /// was configured with a global header. MPEG-4 headers may keep
    /// arriving after open; they are final once the first packet is out.
    pub fn extradata(&self) -> &[u8] {
        self.collector
            .as_ref()
            .map(|collector| collector.extradata().data())
            .unwrap_or_default()
    }

    pub fn is_eos(&self) -> bool {
        self.collector
            .as_ref()
            .is_some_and(|collector| collector.is_eos())
    }

    pub fn stats(&self, direction: Direction) -> PoolStats {
        self.pool.stats(direction)
    }

    pub fn state(&self) -> State {
        self.state.state()
    }

    pub fn ports(&self) -> Option<&NegotiatedPorts> {
        self.ports.as_ref()
    }

    pub fn component_name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The first asynchronous error the component reported, if any.
    pub fn poisoned(&self) -> Option<ErrorCode> {
        self.shared.poisoned()
    }

    /// Tears the session down, returning the first failure encountered.
    /// Resources are released regardless.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    #[instrument(skip(self), fields(component = %self.name))]
    fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        self.submitter = None;
        self.collector = None;

        let mut first_error = None;
        let mut note = |err: Error| {
            warn!(%err, "teardown step failed");
            first_error.get_or_insert(err);
        };

        if let Some(component) = self.component.as_deref() {
            let state = &mut self.state;
            let mut quiesced = true;

            if state.state() == State::Executing {
                let stopped = state
                    .begin(component, State::Idle)
                    .and_then(|_| state.settle(State::Idle));
                if let Err(err) = stopped {
                    quiesced = false;
                    note(err);
                }
            } else if state.pending() == Some(State::Idle) {
                let complete = Direction::ALL.iter().all(|&direction| {
                    self.ports.as_ref().is_some_and(|ports| {
                        self.allocated[direction.index()]
                            == ports.port(direction).buffer_count_actual as usize
                    })
                });
                if complete {
                    if let Err(err) = state.settle(State::Idle) {
                        note(err);
                    }
                }
            }

            let unload = state.state() == State::Idle;
            if unload {
                if let Err(err) = state.begin(component, State::Loaded) {
                    note(err);
                }
            }

            if let Some(ports) = &self.ports {
                let wait = if quiesced { Wait::Drain } else { Wait::Poll };
                for direction in Direction::ALL {
                    let port = ports.port(direction).index;
                    let count = self.allocated[direction.index()];
                    let mut freed = 0;
                    while freed < count {
                        match self.pool.acquire(direction, wait) {
                            Ok(Some(header)) => {
                                if let Err(code) = component.free_buffer(port, header) {
                                    error!(%direction, %code, "free_buffer failed");
                                }
                                freed += 1;
                            }
                            Ok(None) => break,
                            Err(err) => {
                                note(err);
                                break;
                            }
                        }
                    }
                    if freed < count {
                        error!(%direction, freed, count, "buffers abandoned with the component");
                    } else {
                        debug!(%direction, freed, "buffers freed");
                    }
                    self.allocated[direction.index()] = 0;
                }
            }

            if unload && state.pending() == Some(State::Loaded) {
                if let Err(err) = state.settle(State::Loaded) {
                    note(err);
                }
            }
        }

        if let Some(component) = self.component.take() {
            if let Some(loader) = &self.loader {
                loader.release(component);
            }
        }
        self.shared.lanes().close();
        if let Some(mut loader) = self.loader.take() {
            loader.unload();
        }
        info!("session closed");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(%err, "teardown on drop");
        }
    }
}

fn get_port(component: &dyn Component, index: u32) -> std::result::Result<PortDefinition, ErrorCode> {
    let mut param = Param::PortDefinition(PortDefinition::query(index));
    component.get_parameter(&mut param)?;
    match param {
        Param::PortDefinition(def) => Ok(def),
        _ => Err(ErrorCode::BAD_PARAMETER),
    }
}

fn negotiation_failed(what: &str, code: ErrorCode) -> Error {
    Error::PortNegotiationFailed(format!("{}: {}", what, code))
}

/// Logs a rejected optional parameter. Negotiation carries on with the
/// component's default.
fn best_effort(kind: ParamKind, result: std::result::Result<(), ErrorCode>) {
    if let Err(code) = result {
        let err = Error::ParameterRejected { param: kind, code };
        warn!(%err, "continuing with component default");
    }
}

/// Discovers the ports and configures them for `config`.
fn negotiate(component: &dyn Component, config: &SessionConfig) -> Result<NegotiatedPorts> {
    let role = config.codec.role();
    if let Err(code) = component.set_parameter(&Param::ComponentRole(role.to_string())) {
        debug!(%code, role, "component role not set");
    }

    let mut video_init = Param::VideoInit {
        start_port: 0,
        ports: 0,
    };
    component
        .get_parameter(&mut video_init)
        .map_err(|code| negotiation_failed("video port enumeration failed", code))?;
    let Param::VideoInit { start_port, ports } = video_init else {
        return Err(Error::PortNegotiationFailed(
            "video port enumeration returned the wrong parameter".to_string(),
        ));
    };

    let mut input = None;
    let mut output = None;
    for index in start_port..start_port.saturating_add(ports) {
        let def = match get_port(component, index) {
            Ok(def) => def,
            Err(code) => {
                warn!(port = index, %code, "port definition unavailable");
                break;
            }
        };
        match def.direction {
            Direction::Input if input.is_none() => input = Some(def),
            Direction::Output if output.is_none() => output = Some(def),
            _ => {}
        }
    }
    let (Some(mut input), Some(mut output)) = (input, output) else {
        return Err(Error::PortNegotiationFailed(format!(
            "no input and output port among {} ports from {}",
            ports, start_port
        )));
    };

    let store = Param::StoreMetaData {
        port: input.index,
        enabled: false,
    };
    if let Err(code) = component.set_parameter(&store) {
        debug!(%code, "metadata buffers not supported");
    }

    let mut offered = 0;
    let color_format = loop {
        let mut format = Param::VideoPortFormat {
            port: input.index,
            index: offered,
            color_format: crate::backend::ColorFormat::Unused,
            compression: crate::backend::Compression::Unused,
        };
        if component.get_parameter(&mut format).is_err() {
            return Err(Error::PortNegotiationFailed(format!(
                "no colour format for {} among {} offered",
                config.pixel_format, offered
            )));
        }
        offered += 1;
        if let Param::VideoPortFormat { color_format, .. } = format {
            if config.pixel_format.accepts(color_format) {
                break color_format;
            }
        }
    };

    let framerate_q16 = config.framerate_q16();
    input.enabled = true;
    input.populated = false;
    input.video.color_format = color_format;
    input.video.frame_width = config.width;
    input.video.frame_height = config.height;
    input.video.stride = config.width;
    input.video.slice_height = config.height;
    input.video.framerate_q16 = framerate_q16;
    input.video.error_concealment = false;
    component
        .set_parameter(&Param::PortDefinition(input.clone()))
        .map_err(|code| negotiation_failed("input port rejected", code))?;
    let input = get_port(component, input.index)
        .map_err(|code| negotiation_failed("input port unreadable", code))?;

    if input.video.stride < config.width || input.video.slice_height < config.height {
        return Err(Error::PortNegotiationFailed(format!(
            "input port layout {}x{} smaller than the frame {}x{}",
            input.video.stride, input.video.slice_height, config.width, config.height
        )));
    }
    let layout = ImageLayout::new(
        config.pixel_format,
        input.video.stride as usize,
        input.video.slice_height as usize,
    );
    if input.buffer_size < layout.size {
        return Err(Error::PortNegotiationFailed(format!(
            "input buffers of {} bytes cannot hold a {} byte image",
            input.buffer_size, layout.size
        )));
    }

    output.enabled = true;
    output.populated = false;
    output.video.frame_width = config.width;
    output.video.frame_height = config.height;
    output.video.stride = 0;
    output.video.slice_height = 0;
    output.video.framerate_q16 = framerate_q16;
    output.video.compression = config.codec.compression();
    output.video.error_concealment = false;
    component
        .set_parameter(&Param::PortDefinition(output.clone()))
        .map_err(|code| negotiation_failed("output port rejected", code))?;
    let output = get_port(component, output.index)
        .map_err(|code| negotiation_failed("output port unreadable", code))?;

    for port in [&input, &output] {
        if port.buffer_count_actual == 0 || port.buffer_size == 0 {
            return Err(Error::PortNegotiationFailed(format!(
                "{} port {} has no buffers",
                port.direction, port.index
            )));
        }
    }

    if config.rotation != Rotation::Deg0 {
        let rotation = Param::Rotation {
            port: output.index,
            degrees: config.rotation.degrees(),
        };
        match component.set_parameter(&rotation) {
            Ok(()) => debug!(degrees = config.rotation.degrees(), "rotation set"),
            Err(ErrorCode::UNSUPPORTED_INDEX) => warn!("rotation not supported by component"),
            Err(code) => best_effort(ParamKind::Rotation, Err(code)),
        }
    }

    configure_codec(component, config, output.index);

    if config.bit_rate > 0 {
        best_effort(
            ParamKind::Bitrate,
            component.set_parameter(&Param::Bitrate {
                port: output.index,
                control: ControlRate::Variable,
                target: config.bit_rate,
            }),
        );
    }

    Ok(NegotiatedPorts {
        input,
        output,
        layout,
    })
}

/// Applies the key-frame interval and profile through the codec's own
/// parameter structure.
fn configure_codec(component: &dyn Component, config: &SessionConfig, port: u32) {
    let interval = config.key_frame_frames();
    match config.codec {
        Codec::Hevc => {
            let mut param = Param::Hevc(HevcParams {
                port,
                key_frame_interval: 0,
                profile: None,
            });
            if let Err(code) = component.get_parameter(&mut param) {
                best_effort(ParamKind::Hevc, Err(code));
                return;
            }
            if let Param::Hevc(params) = &mut param {
                if interval > 0 {
                    params.key_frame_interval = interval;
                }
                if let Some(profile) = config.profile.hevc() {
                    params.profile = Some(profile);
                }
            }
            best_effort(ParamKind::Hevc, component.set_parameter(&param));
        }
        Codec::H264 => {
            let mut param = Param::Avc(AvcParams {
                port,
                p_frames: 0,
                b_frames: 0,
                profile: None,
            });
            if let Err(code) = component.get_parameter(&mut param) {
                best_effort(ParamKind::Avc, Err(code));
                return;
            }
            if let Param::Avc(params) = &mut param {
                params.b_frames = 0;
                if interval > 0 {
                    params.p_frames = interval - 1;
                }
                if let Some(profile) = config.profile.avc() {
                    params.profile = Some(profile);
                }
            }
            best_effort(ParamKind::Avc, component.set_parameter(&param));
        }
        Codec::Mpeg4 => {}
    }
}
