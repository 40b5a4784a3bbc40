// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Output collection.
//!
//! Completed output buffers carry either stream configuration or pieces of
//! coded pictures. Configuration goes to the [`ConfigurationAccumulator`]
//! when the session collects it out of band. Picture data is appended to
//! the packet being assembled until a buffer flagged end-of-frame closes
//! it. Whatever a buffer carried, it is handed straight back to the
//! component to be filled again.

use crate::{
    backend::{Component, Direction},
    buffer::{BufferFlags, BufferHeader},
    config::Codec,
    error::{Error, Result},
    pool::{BufferPool, Wait},
    time::{rescale, Rational, MICROSECONDS},
};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

const HEVC_VPS: u8 = 32;
const HEVC_SPS: u8 = 33;
const HEVC_PPS: u8 = 34;
const H264_SPS: u8 = 7;
const H264_PPS: u8 = 8;

/// Out-of-band stream configuration, accumulated until every parameter
/// set the codec needs has been seen.
#[derive(Clone, Debug)]
pub struct ConfigurationAccumulator {
    codec: Codec,
    data: Vec<u8>,
    seen: u64,
    complete: bool,
}

impl ConfigurationAccumulator {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            data: Vec::new(),
            seen: 0,
            complete: false,
        }
    }

    /// Appends `bytes` unless the configuration is already complete.
    /// Returns whether anything was appended.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if self.complete {
            return false;
        }
        self.data.extend_from_slice(bytes);
        self.seen = self.scan();
        self.complete = match self.codec {
            Codec::Hevc => self.has(&[HEVC_VPS, HEVC_SPS, HEVC_PPS]),
            Codec::H264 => self.has(&[H264_SPS, H264_PPS]),
            Codec::Mpeg4 => false,
        };
        if self.complete {
            debug!(codec = %self.codec, len = self.data.len(), "stream configuration complete");
        }
        true
    }

    /// Closes a single-unit configuration once the first picture buffer
    /// follows it. Multi-unit configurations only complete through
    /// [`ConfigurationAccumulator::append`].
    pub fn seal(&mut self) {
        if self.complete || self.codec != Codec::Mpeg4 || self.data.is_empty() {
            return;
        }
        self.complete = true;
        debug!(codec = %self.codec, len = self.data.len(), "stream configuration complete");
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether enough configuration is present to start encoding. A
    /// single-unit configuration is usable as soon as it is non-empty but
    /// keeps growing until [`ConfigurationAccumulator::seal`].
    pub fn is_usable(&self) -> bool {
        self.complete || (self.codec == Codec::Mpeg4 && !self.data.is_empty())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether a NAL unit of type `kind` has been seen.
    pub fn contains(&self, kind: u8) -> bool {
        kind < 64 && self.seen & (1 << kind) != 0
    }

    fn has(&self, kinds: &[u8]) -> bool {
        kinds.iter().all(|&kind| self.contains(kind))
    }

    /// Bitmask of the NAL unit types following each start code.
    fn scan(&self) -> u64 {
        let mut seen = 0u64;
        for (i, window) in self.data.windows(4).enumerate() {
            if window[..3] != [0, 0, 1] {
                continue;
            }
            let header = window[3];
            let kind = match self.codec {
                Codec::Hevc => (header >> 1) & 0x3f,
                Codec::H264 => header & 0x1f,
                Codec::Mpeg4 => continue,
            };
            trace!(offset = i, kind, "configuration unit");
            seen |= 1 << kind;
        }
        seen
    }
}

/// A finished coded picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Presentation timestamp in the session time base.
    pub pts: i64,
    /// Always equal to `pts`; pictures are never reordered.
    pub dts: i64,
    pub key: bool,
}

/// Picture data gathered across output buffers.
#[derive(Debug, Default)]
pub struct AssemblingPacket {
    data: Vec<u8>,
    partial: bool,
}

impl AssemblingPacket {
    pub fn append(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        self.data.extend_from_slice(payload);
        self.partial = true;
    }

    /// Whether a picture has been started but not finished.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Closes the picture with the timestamp and flags of its last buffer.
    pub fn finish(&mut self, last: &BufferHeader, time_base: Rational) -> Packet {
        self.partial = false;
        let pts = rescale(last.timestamp.as_micros(), MICROSECONDS, time_base);
        Packet {
            data: std::mem::take(&mut self.data),
            pts,
            dts: pts,
            key: last.flags.contains(BufferFlags::SYNC_FRAME),
        }
    }
}

/// Outcome of one [`OutputCollector::collect`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Collected {
    /// No completed buffer was available.
    Empty,
    /// A buffer was consumed without finishing a packet.
    Absorbed,
    Packet(Packet),
}

pub struct OutputCollector {
    global_header: bool,
    time_base: Rational,
    extradata: ConfigurationAccumulator,
    assembling: AssemblingPacket,
    ready: VecDeque<Packet>,
    eos: bool,
    buffers: u64,
}

impl OutputCollector {
    pub fn new(codec: Codec, global_header: bool, time_base: Rational) -> Self {
        Self {
            global_header,
            time_base,
            extradata: ConfigurationAccumulator::new(codec),
            assembling: AssemblingPacket::default(),
            ready: VecDeque::new(),
            eos: false,
            buffers: 0,
        }
    }

    pub fn extradata(&self) -> &ConfigurationAccumulator {
        &self.extradata
    }

    /// Whether the end-of-stream buffer has come back.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Number of output buffers consumed.
    pub fn buffers(&self) -> u64 {
        self.buffers
    }

    /// Consumes one completed output buffer. Blocks when `block` is set or
    /// a packet is partially assembled; polls otherwise.
    ///
    /// # Errors
    ///
    /// [`Error::BufferExchangeFailed`] when the component refuses the
    /// buffer back. The buffer returns to the completed queue and a packet
    /// it finished is kept for the next call.
    pub fn collect(
        &mut self,
        component: &dyn Component,
        pool: &BufferPool,
        block: bool,
    ) -> Result<Collected> {
        if self.eos {
            return Ok(Collected::Empty);
        }
        let wait = if block || self.assembling.is_partial() {
            Wait::Block
        } else {
            Wait::Poll
        };
        let Some(mut header) = pool.acquire(Direction::Output, wait)? else {
            return Ok(Collected::Empty);
        };
        self.buffers += 1;
        let flags = header.flags;
        trace!(id = header.id(), len = header.filled_len, ?flags, "output buffer");

        let mut collected = Collected::Absorbed;
        if flags.contains(BufferFlags::EOS) {
            debug!(buffers = self.buffers, "end of stream received");
            self.eos = true;
        }
        if flags.contains(BufferFlags::CODEC_CONFIG) && self.global_header {
            if !self.extradata.append(header.payload()) {
                warn!(
                    len = header.filled_len,
                    "configuration after completion dropped"
                );
            }
        } else {
            if self.global_header && (header.filled_len > 0 || !flags.is_empty()) {
                self.extradata.seal();
            }
            self.assembling.append(header.payload());
            let end_of_frame = flags.contains(BufferFlags::END_OF_FRAME);
            let unfinished = !end_of_frame && self.eos && self.assembling.is_partial();
            if unfinished {
                warn!(
                    len = self.assembling.len(),
                    "end of stream inside a picture, closing it"
                );
            }
            if end_of_frame || unfinished {
                let packet = self.assembling.finish(&header, self.time_base);
                if !packet.data.is_empty() {
                    collected = Collected::Packet(packet);
                }
            }
        }

        header.reset();
        let refill = pool.hand_over(Direction::Output, header, |header| {
            component.fill_this_buffer(header)
        });
        if let Err(code) = refill {
            if let Collected::Packet(packet) = collected {
                self.ready.push_back(packet);
            }
            return Err(Error::BufferExchangeFailed {
                op: "fill_this_buffer",
                direction: Direction::Output,
                code,
            });
        }
        Ok(collected)
    }

    /// Returns the next finished packet, if one can be produced. With
    /// `flush` set, waits for one until end of stream.
    pub fn receive_packet(
        &mut self,
        component: &dyn Component,
        pool: &BufferPool,
        flush: bool,
    ) -> Result<Option<Packet>> {
        if let Some(packet) = self.ready.pop_front() {
            return Ok(Some(packet));
        }
        while !self.eos {
            match self.collect(component, pool, flush)? {
                Collected::Empty => return Ok(None),
                Collected::Absorbed => continue,
                Collected::Packet(packet) => return Ok(Some(packet)),
            }
        }
        Ok(None)
    }

    /// Blocks until the stream configuration is usable. Packets finished
    /// on the way are kept for [`OutputCollector::receive_packet`].
    ///
    /// # Errors
    ///
    /// [`Error::PortNegotiationFailed`] if the stream ends first.
    pub fn await_configuration(
        &mut self,
        component: &dyn Component,
        pool: &BufferPool,
    ) -> Result<()> {
        while !self.extradata.is_usable() {
            if self.eos {
                return Err(Error::PortNegotiationFailed(
                    "stream ended before its configuration was complete".to_string(),
                ));
            }
            if let Collected::Packet(packet) = self.collect(component, pool, true)? {
                self.ready.push_back(packet);
            }
        }
        Ok(())
    }
}
