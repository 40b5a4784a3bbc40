// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Software encoder component.
//!
//! [`LoopbackCore`] implements the backend traits without hardware. Each
//! handle runs a worker thread that confirms state changes, consumes input
//! buffers and fills output buffers, all through the registered callbacks
//! just as a hardware component would. The "bitstream" it produces is made
//! of well-formed start codes and NAL headers for the configured codec,
//! carrying the frame index and a checksum of the input instead of coded
//! picture data.
//!
//! The component can be told to misbehave through [`Faults`], and records
//! what was done to it in a [`LoopbackReport`].

use crate::{
    backend::{
        AvcParams, ColorFormat, Command, Component, ComponentCallbacks, Compression, ControlRate,
        Config, Core, Direction, ErrorCode, Event, HevcParams, Param, ParamKind, PortDefinition,
        PortIndex, Rejected, State,
    },
    buffer::{Attachment, BufferFlags, BufferHeader, Ticks},
    config::Codec,
    frame::{ImageLayout, PixelFormat},
};
use kanal::{Receiver, Sender};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, trace, warn};

const INPUT_PORT: PortIndex = 0;
const OUTPUT_PORT: PortIndex = 1;

/// Misbehaviour to inject.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    /// Refuse the core initialisation.
    pub fail_init: bool,
    /// Refuse every handle request.
    pub refuse_handle: bool,
    /// Refuse the n-th call (0 based) to `empty_this_buffer`.
    pub reject_empty: Option<usize>,
    /// Refuse the n-th call (0 based) to `fill_this_buffer`.
    pub reject_fill: Option<usize>,
    /// Report a hardware error once this many frames have been encoded,
    /// then stop consuming input.
    pub error_after_frames: Option<u64>,
    /// Parameters refused by both `get_parameter` and `set_parameter`.
    pub reject_params: Vec<ParamKind>,
    /// Answer the `Loaded -> Idle` command with an error.
    pub refuse_idle: bool,
    /// Fail every buffer allocation after this many succeeded.
    pub fail_allocate_after: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct LoopbackOptions {
    pub name: String,
    pub roles: Vec<String>,
    pub input_buffers: u32,
    pub output_buffers: u32,
    pub output_buffer_size: usize,
    /// Input stride is rounded up to a multiple of this.
    pub stride_align: u32,
    /// Input slice height is rounded up to a multiple of this.
    pub slice_align: u32,
    /// Largest payload placed in one output buffer.
    pub max_chunk: usize,
    /// Filler bytes appended to every coded frame.
    pub frame_bytes: usize,
    /// Emit each parameter set in its own output buffer.
    pub split_config: bool,
    /// Colour formats offered on the input port, in order.
    pub color_formats: Vec<ColorFormat>,
    /// Time spent on every input buffer.
    pub input_delay: Duration,
    pub record_input: bool,
    pub record_output: bool,
    pub rotation_supported: bool,
    pub faults: Faults,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            name: "OMX.loopback.video_encoder".to_string(),
            roles: vec![
                Codec::Hevc.role().to_string(),
                Codec::H264.role().to_string(),
                Codec::Mpeg4.role().to_string(),
            ],
            input_buffers: 4,
            output_buffers: 4,
            output_buffer_size: 1024,
            stride_align: 16,
            slice_align: 16,
            max_chunk: 1024,
            frame_bytes: 48,
            split_config: true,
            color_formats: vec![ColorFormat::Yuv420SemiPlanar, ColorFormat::Yuv420Planar],
            input_delay: Duration::ZERO,
            record_input: false,
            record_output: true,
            rotation_supported: false,
            faults: Faults::default(),
        }
    }
}

/// What the component saw, for assertions.
#[derive(Clone, Debug, Default)]
pub struct LoopbackReport {
    pub initialized: usize,
    pub deinitialized: usize,
    pub handles_acquired: usize,
    pub handles_freed: usize,
    /// Every state command received.
    pub commands: Vec<Command>,
    /// Every state confirmed, in order.
    pub states: Vec<State>,
    /// Parameters accepted through `set_parameter`.
    pub params: Vec<Param>,
    pub refresh_requests: usize,
    pub frames: u64,
    pub key_frames: u64,
    /// Input buffers read in place from the caller's frame.
    pub zero_copy_inputs: usize,
    /// Payloads of the input frames, when `record_input` is set.
    pub inputs: Vec<Vec<u8>>,
    /// Flags and payload of every output buffer, when `record_output` is set.
    pub chunks: Vec<(BufferFlags, Vec<u8>)>,
    pub eos_emitted: usize,
    pub allocated: [usize; 2],
    pub freed: [usize; 2],
    /// Largest number of buffers allocated at the same time.
    pub peak_allocated: [usize; 2],
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn align(value: u32, to: u32) -> u32 {
    if to <= 1 {
        value
    } else {
        value.div_ceil(to) * to
    }
}

fn codec_of(role: &str) -> Codec {
    match role {
        r if r == Codec::H264.role() => Codec::H264,
        r if r == Codec::Mpeg4.role() => Codec::Mpeg4,
        _ => Codec::Hevc,
    }
}

fn slot(port: PortIndex) -> Option<usize> {
    match port {
        INPUT_PORT => Some(0),
        OUTPUT_PORT => Some(1),
        _ => None,
    }
}

/// Parameter sets announced ahead of the first frame.
fn config_units(codec: Codec) -> Vec<Vec<u8>> {
    match codec {
        Codec::Hevc => vec![
            vec![0, 0, 0, 1, 0x40, 0x01, 0x0c, 0x01, 0xff, 0xff],
            vec![0, 0, 0, 1, 0x42, 0x01, 0x01, 0x01, 0x60, 0x00],
            vec![0, 0, 0, 1, 0x44, 0x01, 0xc1, 0x72, 0xb4],
        ],
        Codec::H264 => vec![
            vec![0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1f, 0xda],
            vec![0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80],
        ],
        Codec::Mpeg4 => vec![
            vec![0, 0, 1, 0xb0, 0x01],
            vec![0, 0, 1, 0xb5, 0x09],
            vec![0, 0, 1, 0x00],
            vec![0, 0, 1, 0x20, 0x08, 0x84],
        ],
    }
}

/// One coded picture: a picture NAL header followed by the frame index,
/// the input length and checksum, and filler.
fn frame_unit(codec: Codec, key: bool, index: u64, input: &[u8], filler: usize) -> Vec<u8> {
    let mut unit = match (codec, key) {
        (Codec::Hevc, true) => vec![0, 0, 0, 1, 0x26, 0x01],
        (Codec::Hevc, false) => vec![0, 0, 0, 1, 0x02, 0x01],
        (Codec::H264, true) => vec![0, 0, 0, 1, 0x65],
        (Codec::H264, false) => vec![0, 0, 0, 1, 0x41],
        (Codec::Mpeg4, _) => vec![0, 0, 1, 0xb6],
    };
    let checksum = input
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32));
    unit.extend_from_slice(&index.to_be_bytes());
    unit.extend_from_slice(&(input.len() as u32).to_be_bytes());
    unit.extend_from_slice(&checksum.to_be_bytes());
    unit.extend((0..filler).map(|i| 0x80 | (i as u8 & 0x7f)));
    unit
}

/// Decodes the frame index and checksum from a picture produced by the
/// loopback component.
pub fn parse_frame(packet: &[u8]) -> Option<(u64, u32, u32)> {
    let starts: [&[u8]; 5] = [
        &[0, 0, 0, 1, 0x26, 0x01],
        &[0, 0, 0, 1, 0x02, 0x01],
        &[0, 0, 0, 1, 0x65],
        &[0, 0, 0, 1, 0x41],
        &[0, 0, 1, 0xb6],
    ];
    let (position, start) = starts
        .iter()
        .filter_map(|start| {
            packet
                .windows(start.len())
                .position(|window| window == *start)
                .map(|position| (position, start.len()))
        })
        .min()?;
    let body = packet.get(position + start..position + start + 16)?;
    let index = u64::from_be_bytes(body[..8].try_into().ok()?);
    let len = u32::from_be_bytes(body[8..12].try_into().ok()?);
    let checksum = u32::from_be_bytes(body[12..16].try_into().ok()?);
    Some((index, len, checksum))
}

enum Job {
    Command(Command),
    Empty(BufferHeader),
    Fill(BufferHeader),
    /// Make the next picture a sync frame.
    Refresh,
    /// Re-check conditions a pending transition waits for.
    Poke,
    Shutdown,
}

enum Out {
    Event(Event),
    EmptyDone(BufferHeader),
    FillDone(BufferHeader),
}

struct Chunk {
    flags: BufferFlags,
    data: Vec<u8>,
    timestamp: Ticks,
}

struct Inner {
    state: State,
    pending: Option<State>,
    ports: [PortDefinition; 2],
    role: String,
    hevc: HevcParams,
    avc: AvcParams,
    bitrate: u32,
    rotation: i32,
    next_id: usize,
    allocations: usize,
    allocated: [usize; 2],
    empties: usize,
    fills: usize,
    refresh: bool,
    config_sent: bool,
    frames: u64,
    failed: bool,
    held: VecDeque<BufferHeader>,
    outputs: VecDeque<BufferHeader>,
    chunks: VecDeque<Chunk>,
}

impl Inner {
    fn new(options: &LoopbackOptions) -> Self {
        let role = options
            .roles
            .first()
            .cloned()
            .unwrap_or_else(|| Codec::Hevc.role().to_string());
        let mut input = PortDefinition::query(INPUT_PORT);
        input.direction = Direction::Input;
        input.enabled = true;
        input.buffer_count_actual = options.input_buffers;
        input.buffer_count_min = 1;
        input.video.color_format = options
            .color_formats
            .first()
            .copied()
            .unwrap_or(ColorFormat::Unused);
        let mut output = PortDefinition::query(OUTPUT_PORT);
        output.direction = Direction::Output;
        output.enabled = true;
        output.buffer_count_actual = options.output_buffers;
        output.buffer_count_min = 1;
        output.buffer_size = options.output_buffer_size;
        output.video.compression = codec_of(&role).compression();
        Self {
            state: State::Loaded,
            pending: None,
            ports: [input, output],
            role,
            hevc: HevcParams {
                port: OUTPUT_PORT,
                key_frame_interval: 0,
                profile: None,
            },
            avc: AvcParams {
                port: OUTPUT_PORT,
                p_frames: 0,
                b_frames: 0,
                profile: None,
            },
            bitrate: 0,
            rotation: 0,
            next_id: 0,
            allocations: 0,
            allocated: [0; 2],
            empties: 0,
            fills: 0,
            refresh: false,
            config_sent: false,
            frames: 0,
            failed: false,
            held: VecDeque::new(),
            outputs: VecDeque::new(),
            chunks: VecDeque::new(),
        }
    }

    fn codec(&self) -> Codec {
        codec_of(&self.role)
    }

    fn enter(&mut self, state: State, report: &Mutex<LoopbackReport>, out: &mut Vec<Out>) {
        debug!(%state, "loopback state");
        self.state = state;
        lock(report).states.push(state);
        out.push(Out::Event(Event::CmdComplete(Command::StateSet(state))));
    }

    fn command(
        &mut self,
        command: Command,
        options: &LoopbackOptions,
        report: &Mutex<LoopbackReport>,
        out: &mut Vec<Out>,
    ) {
        let Command::StateSet(target) = command else {
            out.push(Out::Event(Event::CmdComplete(command)));
            return;
        };
        match (self.state, target) {
            (State::Loaded, State::Idle) if options.faults.refuse_idle => {
                out.push(Out::Event(Event::Error(ErrorCode::INSUFFICIENT_RESOURCES)));
            }
            (State::Loaded, State::Idle) | (State::Idle, State::Loaded) => {
                self.pending = Some(target);
                self.settle(report, out);
            }
            (State::Idle, State::Executing) => self.enter(State::Executing, report, out),
            (State::Executing, State::Idle) => {
                out.extend(self.held.drain(..).map(Out::EmptyDone));
                out.extend(self.outputs.drain(..).map(|mut header| {
                    header.reset();
                    Out::FillDone(header)
                }));
                self.chunks.clear();
                self.enter(State::Idle, report, out);
            }
            (from, to) if from == to => {
                out.push(Out::Event(Event::Error(ErrorCode::SAME_STATE)));
            }
            _ => out.push(Out::Event(Event::Error(
                ErrorCode::INCORRECT_STATE_TRANSITION,
            ))),
        }
    }

    /// Completes a pending transition once the ports allow it.
    fn settle(&mut self, report: &Mutex<LoopbackReport>, out: &mut Vec<Out>) {
        let populated = [
            self.ports[0].buffer_count_actual as usize,
            self.ports[1].buffer_count_actual as usize,
        ];
        match self.pending {
            Some(State::Idle) if self.allocated == populated => {
                self.pending = None;
                self.enter(State::Idle, report, out);
            }
            Some(State::Loaded) if self.allocated == [0, 0] => {
                self.pending = None;
                self.enter(State::Loaded, report, out);
            }
            _ => {}
        }
    }

    fn consume(
        &mut self,
        header: BufferHeader,
        options: &LoopbackOptions,
        report: &Mutex<LoopbackReport>,
        out: &mut Vec<Out>,
    ) {
        if self.state != State::Executing || self.failed {
            trace!(id = header.id(), "input held");
            self.held.push_back(header);
            return;
        }
        let flags = header.flags;
        let timestamp = header.timestamp;
        if flags.contains(BufferFlags::CODEC_CONFIG) && header.filled_len == 0 {
            if !self.config_sent {
                self.emit_config(timestamp, options);
            }
        } else if flags.contains(BufferFlags::EOS) && header.filled_len == 0 {
            self.chunks.push_back(Chunk {
                flags: BufferFlags::EOS,
                data: Vec::new(),
                timestamp,
            });
        } else {
            {
                let mut report = lock(report);
                if matches!(header.attachment(), Some(Attachment::Frame(_))) {
                    report.zero_copy_inputs += 1;
                }
                if options.record_input {
                    report.inputs.push(header.payload().to_vec());
                }
            }
            self.encode(&header, options, report);
            if flags.contains(BufferFlags::EOS) {
                self.chunks.push_back(Chunk {
                    flags: BufferFlags::EOS,
                    data: Vec::new(),
                    timestamp,
                });
            }
        }
        out.push(Out::EmptyDone(header));
        self.pump(options, report, out);

        if !self.failed && options.faults.error_after_frames == Some(self.frames) {
            warn!(frames = self.frames, "loopback injecting hardware error");
            self.failed = true;
            out.push(Out::Event(Event::Error(ErrorCode::HARDWARE)));
        }
    }

    fn emit_config(&mut self, timestamp: Ticks, options: &LoopbackOptions) {
        self.config_sent = true;
        let units = config_units(self.codec());
        let pieces = if options.split_config {
            units
        } else {
            vec![units.concat()]
        };
        let max = self.chunk_limit(options);
        for piece in pieces {
            for data in piece.chunks(max) {
                self.chunks.push_back(Chunk {
                    flags: BufferFlags::CODEC_CONFIG,
                    data: data.to_vec(),
                    timestamp,
                });
            }
        }
    }

    fn encode(
        &mut self,
        header: &BufferHeader,
        options: &LoopbackOptions,
        report: &Mutex<LoopbackReport>,
    ) {
        if !self.config_sent {
            self.emit_config(header.timestamp, options);
        }
        let codec = self.codec();
        let gop = match codec {
            Codec::Hevc => self.hevc.key_frame_interval as u64,
            Codec::H264 if self.avc.p_frames > 0 => self.avc.p_frames as u64 + 1,
            _ => 0,
        };
        let key = self.frames == 0 || self.refresh || (gop > 0 && self.frames % gop == 0);
        self.refresh = false;

        let unit = frame_unit(codec, key, self.frames, header.payload(), options.frame_bytes);
        let max = self.chunk_limit(options);
        let count = unit.chunks(max).count();
        for (i, data) in unit.chunks(max).enumerate() {
            let mut flags = BufferFlags::empty();
            if i + 1 == count {
                flags.insert(BufferFlags::END_OF_FRAME);
                if key {
                    flags.insert(BufferFlags::SYNC_FRAME);
                }
            }
            self.chunks.push_back(Chunk {
                flags,
                data: data.to_vec(),
                timestamp: header.timestamp,
            });
        }
        self.frames += 1;
        let mut report = lock(report);
        report.frames = self.frames;
        if key {
            report.key_frames += 1;
        }
    }

    fn chunk_limit(&self, options: &LoopbackOptions) -> usize {
        options.max_chunk.min(self.ports[1].buffer_size).max(1)
    }

    /// Moves produced chunks into the output buffers available.
    fn pump(&mut self, options: &LoopbackOptions, report: &Mutex<LoopbackReport>, out: &mut Vec<Out>) {
        if self.state != State::Executing {
            return;
        }
        while !self.chunks.is_empty() && !self.outputs.is_empty() {
            let (Some(chunk), Some(mut header)) = (self.chunks.pop_front(), self.outputs.pop_front())
            else {
                break;
            };
            header.reset();
            header.write_payload(&chunk.data);
            header.flags = chunk.flags;
            header.timestamp = chunk.timestamp;
            let mut report = lock(report);
            if chunk.flags.contains(BufferFlags::EOS) {
                report.eos_emitted += 1;
            }
            if options.record_output {
                report.chunks.push((chunk.flags, chunk.data));
            }
            out.push(Out::FillDone(header));
        }
    }
}

/// A software encoder library exposing one component name.
pub struct LoopbackCore {
    options: Arc<LoopbackOptions>,
    report: Arc<Mutex<LoopbackReport>>,
}

impl LoopbackCore {
    pub fn new(options: LoopbackOptions) -> Arc<Self> {
        Arc::new(Self {
            options: Arc::new(options),
            report: Arc::new(Mutex::new(LoopbackReport::default())),
        })
    }

    pub fn options(&self) -> &LoopbackOptions {
        &self.options
    }

    /// Snapshot of everything recorded so far.
    pub fn report(&self) -> LoopbackReport {
        lock(&self.report).clone()
    }
}

impl Core for LoopbackCore {
    fn initialize(&self) -> Result<(), ErrorCode> {
        lock(&self.report).initialized += 1;
        if self.options.faults.fail_init {
            return Err(ErrorCode::INSUFFICIENT_RESOURCES);
        }
        Ok(())
    }

    fn deinitialize(&self) -> Result<(), ErrorCode> {
        lock(&self.report).deinitialized += 1;
        Ok(())
    }

    fn components_of_role(&self, role: &str) -> Vec<String> {
        if self.options.roles.iter().any(|r| r == role) {
            vec![self.options.name.clone()]
        } else {
            Vec::new()
        }
    }

    fn get_handle(
        &self,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Box<dyn Component>, ErrorCode> {
        if name != self.options.name {
            return Err(ErrorCode::COMPONENT_NOT_FOUND);
        }
        if self.options.faults.refuse_handle {
            return Err(ErrorCode::INSUFFICIENT_RESOURCES);
        }
        let component = LoopbackComponent::start(self.options.clone(), self.report.clone(), callbacks)
            .map_err(|err| {
                warn!(%err, "loopback worker failed to start");
                ErrorCode::INSUFFICIENT_RESOURCES
            })?;
        lock(&self.report).handles_acquired += 1;
        Ok(Box::new(component))
    }

    fn free_handle(&self, component: Box<dyn Component>) -> Result<(), ErrorCode> {
        drop(component);
        lock(&self.report).handles_freed += 1;
        Ok(())
    }
}

/// One component instance and its worker thread.
pub struct LoopbackComponent {
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    inner: Arc<Mutex<Inner>>,
    options: Arc<LoopbackOptions>,
    report: Arc<Mutex<LoopbackReport>>,
}

impl LoopbackComponent {
    fn start(
        options: Arc<LoopbackOptions>,
        report: Arc<Mutex<LoopbackReport>>,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> std::io::Result<Self> {
        let inner = Arc::new(Mutex::new(Inner::new(&options)));
        let (jobs, queue) = kanal::unbounded();
        let worker = {
            let inner = inner.clone();
            let options = options.clone();
            let report = report.clone();
            thread::Builder::new()
                .name("loopback".to_string())
                .spawn(move || run(queue, inner, options, report, callbacks))?
        };
        Ok(Self {
            jobs,
            worker: Some(worker),
            inner,
            options,
            report,
        })
    }

    fn post(&self, job: Job) -> bool {
        if self.jobs.is_closed() {
            return false;
        }
        self.jobs.send(job).is_ok()
    }

    fn exchange(
        &self,
        header: BufferHeader,
        reject_at: Option<usize>,
        counter: impl FnOnce(&mut Inner) -> usize,
        job: fn(BufferHeader) -> Job,
    ) -> Result<(), Rejected> {
        let call = {
            let mut inner = lock(&self.inner);
            if inner.state == State::Loaded {
                return Err(Rejected {
                    code: ErrorCode::INCORRECT_STATE_OPERATION,
                    header,
                });
            }
            counter(&mut inner)
        };
        if reject_at == Some(call) {
            return Err(Rejected {
                code: ErrorCode::INSUFFICIENT_RESOURCES,
                header,
            });
        }
        if self.jobs.is_closed() {
            return Err(Rejected {
                code: ErrorCode::INVALID_STATE,
                header,
            });
        }
        if self.jobs.send(job(header)).is_err() {
            warn!("loopback worker gone, buffer dropped");
        }
        Ok(())
    }

    fn rejected(&self, kind: ParamKind) -> bool {
        self.options.faults.reject_params.contains(&kind)
    }
}

impl Drop for LoopbackComponent {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("loopback worker panicked");
            }
        }
    }
}

fn run(
    queue: Receiver<Job>,
    inner: Arc<Mutex<Inner>>,
    options: Arc<LoopbackOptions>,
    report: Arc<Mutex<LoopbackReport>>,
    callbacks: Arc<dyn ComponentCallbacks>,
) {
    while let Ok(job) = queue.recv() {
        let mut out = Vec::new();
        match job {
            Job::Shutdown => break,
            Job::Command(command) => lock(&inner).command(command, &options, &report, &mut out),
            Job::Poke => lock(&inner).settle(&report, &mut out),
            Job::Refresh => lock(&inner).refresh = true,
            Job::Empty(header) => {
                if !options.input_delay.is_zero() {
                    thread::sleep(options.input_delay);
                }
                lock(&inner).consume(header, &options, &report, &mut out);
            }
            Job::Fill(header) => {
                let mut inner = lock(&inner);
                inner.outputs.push_back(header);
                inner.pump(&options, &report, &mut out);
            }
        }
        for out in out {
            match out {
                Out::Event(event) => callbacks.event(event),
                Out::EmptyDone(header) => callbacks.empty_buffer_done(header),
                Out::FillDone(header) => callbacks.fill_buffer_done(header),
            }
        }
    }
    debug!("loopback worker stopped");
}

fn input_buffer_size(color: ColorFormat, stride: u32, slice_height: u32) -> usize {
    let (stride, slice_height) = (stride as usize, slice_height as usize);
    match color {
        ColorFormat::Yuv420SemiPlanar => {
            ImageLayout::new(PixelFormat::Nv12, stride, slice_height).size
        }
        ColorFormat::Yuv420Planar | ColorFormat::Yuv420PackedPlanar => {
            ImageLayout::new(PixelFormat::Yuv420p, stride, slice_height).size
        }
        _ => stride * slice_height * 3 / 2,
    }
}

impl Component for LoopbackComponent {
    fn send_command(&self, command: Command) -> Result<(), ErrorCode> {
        lock(&self.report).commands.push(command);
        if self.post(Job::Command(command)) {
            Ok(())
        } else {
            Err(ErrorCode::INVALID_STATE)
        }
    }

    fn get_parameter(&self, param: &mut Param) -> Result<(), ErrorCode> {
        if self.rejected(param.kind()) {
            return Err(ErrorCode::UNSUPPORTED_SETTING);
        }
        let inner = lock(&self.inner);
        match param {
            Param::ComponentRole(role) => *role = inner.role.clone(),
            Param::StoreMetaData { .. } => return Err(ErrorCode::UNSUPPORTED_INDEX),
            Param::VideoInit { start_port, ports } => {
                *start_port = INPUT_PORT;
                *ports = 2;
            }
            Param::PortDefinition(def) => {
                let slot = slot(def.index).ok_or(ErrorCode::BAD_PORT_INDEX)?;
                *def = inner.ports[slot].clone();
            }
            Param::VideoPortFormat {
                port,
                index,
                color_format,
                compression,
            } => match *port {
                INPUT_PORT => {
                    *color_format = *self
                        .options
                        .color_formats
                        .get(*index as usize)
                        .ok_or(ErrorCode::NO_MORE)?;
                    *compression = Compression::Unused;
                }
                OUTPUT_PORT if *index == 0 => {
                    *color_format = ColorFormat::Unused;
                    *compression = inner.codec().compression();
                }
                OUTPUT_PORT => return Err(ErrorCode::NO_MORE),
                _ => return Err(ErrorCode::BAD_PORT_INDEX),
            },
            Param::Bitrate {
                control, target, ..
            } => {
                *control = ControlRate::Variable;
                *target = inner.bitrate;
            }
            Param::Avc(avc) => *avc = inner.avc.clone(),
            Param::Hevc(hevc) => *hevc = inner.hevc.clone(),
            Param::Rotation { degrees, .. } => {
                if !self.options.rotation_supported {
                    return Err(ErrorCode::UNSUPPORTED_INDEX);
                }
                *degrees = inner.rotation;
            }
        }
        Ok(())
    }

    fn set_parameter(&self, param: &Param) -> Result<(), ErrorCode> {
        if self.rejected(param.kind()) {
            return Err(ErrorCode::UNSUPPORTED_SETTING);
        }
        let mut inner = lock(&self.inner);
        match param {
            Param::ComponentRole(role) => {
                if !self.options.roles.contains(role) {
                    return Err(ErrorCode::BAD_PARAMETER);
                }
                inner.role = role.clone();
                let compression = inner.codec().compression();
                inner.ports[1].video.compression = compression;
            }
            Param::StoreMetaData { .. } => return Err(ErrorCode::UNSUPPORTED_INDEX),
            Param::VideoInit { .. } => return Err(ErrorCode::UNSUPPORTED_SETTING),
            Param::PortDefinition(def) => {
                if inner.state != State::Loaded {
                    return Err(ErrorCode::INCORRECT_STATE_OPERATION);
                }
                let slot = slot(def.index).ok_or(ErrorCode::BAD_PORT_INDEX)?;
                let port = &mut inner.ports[slot];
                port.enabled = def.enabled;
                port.video.frame_width = def.video.frame_width;
                port.video.frame_height = def.video.frame_height;
                port.video.framerate_q16 = def.video.framerate_q16;
                port.video.error_concealment = def.video.error_concealment;
                if slot == 0 {
                    if !self.options.color_formats.contains(&def.video.color_format) {
                        return Err(ErrorCode::UNSUPPORTED_SETTING);
                    }
                    let video = &mut port.video;
                    video.color_format = def.video.color_format;
                    video.stride = align(
                        def.video.stride.max(def.video.frame_width),
                        self.options.stride_align,
                    );
                    video.slice_height = align(
                        def.video.slice_height.max(def.video.frame_height),
                        self.options.slice_align,
                    );
                    port.buffer_size =
                        input_buffer_size(video.color_format, video.stride, video.slice_height);
                } else {
                    port.video.compression = def.video.compression;
                }
            }
            Param::VideoPortFormat { .. } => {}
            Param::Bitrate { target, .. } => inner.bitrate = *target,
            Param::Avc(avc) => inner.avc = avc.clone(),
            Param::Hevc(hevc) => inner.hevc = hevc.clone(),
            Param::Rotation { degrees, .. } => {
                if !self.options.rotation_supported {
                    return Err(ErrorCode::UNSUPPORTED_INDEX);
                }
                inner.rotation = *degrees;
            }
        }
        drop(inner);
        lock(&self.report).params.push(param.clone());
        Ok(())
    }

    fn set_config(&self, config: &Config) -> Result<(), ErrorCode> {
        match config {
            Config::IntraRefresh { port } if *port == OUTPUT_PORT => {
                lock(&self.report).refresh_requests += 1;
                if self.post(Job::Refresh) {
                    Ok(())
                } else {
                    Err(ErrorCode::INVALID_STATE)
                }
            }
            Config::IntraRefresh { .. } => Err(ErrorCode::BAD_PORT_INDEX),
        }
    }

    fn allocate_buffer(&self, port: PortIndex, size: usize) -> Result<BufferHeader, ErrorCode> {
        let slot = slot(port).ok_or(ErrorCode::BAD_PORT_INDEX)?;
        let header = {
            let mut inner = lock(&self.inner);
            if size < inner.ports[slot].buffer_size {
                return Err(ErrorCode::BAD_PARAMETER);
            }
            if inner.allocated[slot] >= inner.ports[slot].buffer_count_actual as usize {
                return Err(ErrorCode::INCORRECT_STATE_OPERATION);
            }
            if let Some(limit) = self.options.faults.fail_allocate_after {
                if inner.allocations >= limit {
                    return Err(ErrorCode::INSUFFICIENT_RESOURCES);
                }
            }
            let header = BufferHeader::new(inner.next_id, port, size);
            inner.next_id += 1;
            inner.allocations += 1;
            inner.allocated[slot] += 1;
            let mut report = lock(&self.report);
            report.allocated[slot] += 1;
            report.peak_allocated[slot] = report.peak_allocated[slot].max(inner.allocated[slot]);
            header
        };
        self.post(Job::Poke);
        Ok(header)
    }

    fn free_buffer(&self, port: PortIndex, header: BufferHeader) -> Result<(), ErrorCode> {
        let slot = slot(port).ok_or(ErrorCode::BAD_PORT_INDEX)?;
        if header.port() != port {
            return Err(ErrorCode::BAD_PORT_INDEX);
        }
        {
            let mut inner = lock(&self.inner);
            inner.allocated[slot] = inner.allocated[slot].saturating_sub(1);
            lock(&self.report).freed[slot] += 1;
        }
        drop(header);
        self.post(Job::Poke);
        Ok(())
    }

    fn empty_this_buffer(&self, header: BufferHeader) -> Result<(), Rejected> {
        self.exchange(
            header,
            self.options.faults.reject_empty,
            |inner| {
                inner.empties += 1;
                inner.empties - 1
            },
            Job::Empty,
        )
    }

    fn fill_this_buffer(&self, header: BufferHeader) -> Result<(), Rejected> {
        self.exchange(
            header,
            self.options.faults.reject_fill,
            |inner| {
                inner.fills += 1;
                inner.fills - 1
            },
            Job::Fill,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_unit_round_trips_through_parse() {
        let unit = frame_unit(Codec::Hevc, true, 7, &[1, 2, 3], 4);
        assert_eq!(parse_frame(&unit), Some((7, 3, 6)));

        let mut packet = config_units(Codec::Hevc).concat();
        packet.extend(frame_unit(Codec::Hevc, false, 9, &[255, 255], 0));
        assert_eq!(parse_frame(&packet), Some((9, 2, 510)));
    }

    #[test]
    fn aligned_input_buffers() {
        assert_eq!(align(100, 16), 112);
        assert_eq!(align(96, 16), 96);
        assert_eq!(align(7, 0), 7);
        assert_eq!(
            input_buffer_size(ColorFormat::Yuv420SemiPlanar, 64, 32),
            64 * 48
        );
    }

    #[test]
    fn roles_resolve_to_the_component() {
        let core = LoopbackCore::new(LoopbackOptions::default());
        assert_eq!(
            core.components_of_role("video_encoder.avc"),
            vec!["OMX.loopback.video_encoder".to_string()]
        );
        assert!(core.components_of_role("video_decoder.avc").is_empty());
    }
}
