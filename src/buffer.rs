// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Buffer headers exchanged with the component.
//!
//! A [`BufferHeader`] owns the memory the component allocated for it. Input
//! headers may additionally carry an [`Attachment`]: either a reference to
//! the caller's frame, when its layout already matches the port and the
//! component can read it directly, or a scratch allocation holding a copy.
//! The attachment is dropped as soon as the component hands the header
//! back, which is what releases the caller's frame.

use crate::{backend::PortIndex, frame::VideoFrame};
use std::{fmt, ops::BitOr, sync::Arc};

/// Flags carried on a buffer header.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    /// Last buffer of the stream.
    pub const EOS: BufferFlags = BufferFlags(0x0000_0001);
    /// Buffer ends a coded frame.
    pub const END_OF_FRAME: BufferFlags = BufferFlags(0x0000_0010);
    /// Buffer belongs to a frame that can be decoded on its own.
    pub const SYNC_FRAME: BufferFlags = BufferFlags(0x0000_0020);
    /// Buffer carries stream configuration rather than picture data.
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(0x0000_0080);

    pub const fn empty() -> Self {
        BufferFlags(0)
    }

    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BufferFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::EOS, "EOS"),
            (Self::END_OF_FRAME, "END_OF_FRAME"),
            (Self::SYNC_FRAME, "SYNC_FRAME"),
            (Self::CODEC_CONFIG, "CODEC_CONFIG"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            write!(f, "{:#x}", self.0)?;
        }
        Ok(())
    }
}

/// 64-bit timestamp in microseconds split into two 32-bit halves, the way
/// the component's header structure stores it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Ticks {
    pub low: u32,
    pub high: u32,
}

impl Ticks {
    pub fn from_micros(micros: i64) -> Self {
        let bits = micros as u64;
        Self {
            low: bits as u32,
            high: (bits >> 32) as u32,
        }
    }

    pub fn as_micros(self) -> i64 {
        ((self.high as u64) << 32 | self.low as u64) as i64
    }
}

/// Memory attached to an input header in place of its own allocation.
pub enum Attachment {
    /// The caller's frame, read in place.
    Frame(Arc<VideoFrame>),
    /// A copy of the frame in its own allocation.
    Scratch(Box<[u8]>),
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attachment::Frame(frame) => write!(f, "Frame({})", frame),
            Attachment::Scratch(data) => write!(f, "Scratch({} bytes)", data.len()),
        }
    }
}

/// A buffer header and the memory it describes.
pub struct BufferHeader {
    id: usize,
    port: PortIndex,
    memory: Box<[u8]>,
    attachment: Option<Attachment>,
    /// Number of valid bytes starting at `offset`.
    pub filled_len: usize,
    pub offset: usize,
    pub flags: BufferFlags,
    pub timestamp: Ticks,
}

impl BufferHeader {
    /// A header with `size` zeroed bytes of backing memory, as produced by
    /// the component's buffer allocator.
    pub fn new(id: usize, port: PortIndex, size: usize) -> Self {
        Self {
            id,
            port,
            memory: vec![0; size].into_boxed_slice(),
            attachment: None,
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::empty(),
            timestamp: Ticks::default(),
        }
    }

    /// Identity assigned by the allocator, unique per component.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn port(&self) -> PortIndex {
        self.port
    }

    /// Size of the header's own memory.
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// The memory the component should read: the attachment if one is set,
    /// otherwise the header's own memory.
    pub fn data(&self) -> &[u8] {
        match &self.attachment {
            Some(Attachment::Frame(frame)) => frame.plane(0),
            Some(Attachment::Scratch(data)) => data,
            None => &self.memory,
        }
    }

    /// The valid bytes, `filled_len` bytes from `offset`, clamped to the
    /// memory actually present.
    pub fn payload(&self) -> &[u8] {
        let data = self.data();
        let start = self.offset.min(data.len());
        let end = start.saturating_add(self.filled_len).min(data.len());
        &data[start..end]
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Replaces the memory the component reads with `attachment`.
    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn detach(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Clears the fill state so the header can be handed out again.
    pub fn reset(&mut self) {
        self.attachment = None;
        self.filled_len = 0;
        self.offset = 0;
        self.flags = BufferFlags::empty();
        self.timestamp = Ticks::default();
    }

    /// Copies `bytes` into the header's memory, truncating to its capacity.
    /// Returns the number of bytes written.
    pub fn write_payload(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(self.memory.len());
        self.memory[..len].copy_from_slice(&bytes[..len]);
        self.offset = 0;
        self.filled_len = len;
        len
    }
}

impl fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHeader")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("capacity", &self.memory.len())
            .field("attachment", &self.attachment)
            .field("filled_len", &self.filled_len)
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .field("timestamp", &self.timestamp.as_micros())
            .finish()
    }
}
