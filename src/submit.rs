// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame submission.
//!
//! Each frame takes one free input header. A frame whose planes already
//! sit where the negotiated layout puts them is attached to the header and
//! read by the component in place. Otherwise the frame is copied, either
//! into a scratch allocation (zero-copy requested, layout mismatched) or
//! into the header's own memory.

use crate::{
    backend::{Component, Config, Direction, PortIndex},
    buffer::{Attachment, BufferFlags, BufferHeader, Ticks},
    error::{Error, Result},
    frame::{copy_planes, ImageLayout, PictureType, VideoFrame},
    pool::{BufferPool, Wait},
    time::{checked_rescale, Rational, MICROSECONDS},
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// How a frame reached the component.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubmitPath {
    ZeroCopy,
    Scratch,
    InPlace,
}

pub struct FrameSubmitter {
    layout: ImageLayout,
    output_port: PortIndex,
    zero_copy: bool,
    time_base: Rational,
    eos_sent: bool,
    submitted: u64,
}

impl FrameSubmitter {
    pub fn new(
        layout: ImageLayout,
        output_port: PortIndex,
        zero_copy: bool,
        time_base: Rational,
    ) -> Self {
        Self {
            layout,
            output_port,
            zero_copy,
            time_base,
            eos_sent: false,
            submitted: 0,
        }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn eos_sent(&self) -> bool {
        self.eos_sent
    }

    /// Number of frames handed to the component.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Submits one frame, blocking until an input header is free.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFrame`] when the frame cannot be laid out for the
    /// port, [`Error::MemoryExhausted`] when the scratch copy cannot be
    /// allocated and [`Error::BufferExchangeFailed`] when the component
    /// refuses the buffer. In all three cases the header is back in the
    /// free queue and the session stays usable.
    pub fn submit(
        &mut self,
        component: &dyn Component,
        pool: &BufferPool,
        frame: &Arc<VideoFrame>,
    ) -> Result<SubmitPath> {
        if self.eos_sent {
            return Err(Error::Closed);
        }
        if frame.format() != self.layout.format {
            return Err(Error::InvalidFrame(format!(
                "frame is {} but the port expects {}",
                frame.format(),
                self.layout.format
            )));
        }

        let micros = checked_rescale(frame.pts, self.time_base, MICROSECONDS).ok_or_else(|| {
            Error::InvalidFrame(format!(
                "pts {} in time base {} is out of range",
                frame.pts, self.time_base
            ))
        })?;

        let mut header = pool
            .acquire(Direction::Input, Wait::Block)?
            .ok_or(Error::Closed)?;
        header.reset();

        let path = match self.fill(&mut header, frame) {
            Ok(path) => path,
            Err(err) => {
                pool.release(Direction::Input, header);
                return Err(err);
            }
        };
        header.offset = 0;
        header.filled_len = self.layout.size;
        header.flags = BufferFlags::END_OF_FRAME;
        header.timestamp = Ticks::from_micros(micros);

        if frame.picture_type == PictureType::Intra {
            let refresh = Config::IntraRefresh {
                port: self.output_port,
            };
            if let Err(code) = component.set_config(&refresh) {
                warn!(%code, pts = frame.pts, "intra refresh request failed");
            }
        }

        trace!(id = header.id(), pts = frame.pts, ?path, "submitting frame");
        pool.hand_over(Direction::Input, header, |header| {
            component.empty_this_buffer(header)
        })
        .map_err(|code| Error::BufferExchangeFailed {
            op: "empty_this_buffer",
            direction: Direction::Input,
            code,
        })?;
        self.submitted += 1;
        Ok(path)
    }

    fn fill(&self, header: &mut BufferHeader, frame: &Arc<VideoFrame>) -> Result<SubmitPath> {
        let size = self.layout.size;
        if self.zero_copy && self.layout.matches(frame) {
            header.attach(Attachment::Frame(frame.clone()));
            return Ok(SubmitPath::ZeroCopy);
        }
        if self.zero_copy {
            let mut scratch = Vec::new();
            scratch
                .try_reserve_exact(size)
                .map_err(|_| Error::MemoryExhausted { bytes: size })?;
            scratch.resize(size, 0);
            copy_planes(frame, &self.layout, &mut scratch)?;
            header.attach(Attachment::Scratch(scratch.into_boxed_slice()));
            return Ok(SubmitPath::Scratch);
        }
        copy_planes(frame, &self.layout, header.memory_mut())?;
        Ok(SubmitPath::InPlace)
    }

    /// Submits the end-of-stream marker. Only the first call sends it;
    /// later calls return `Ok(false)`.
    pub fn submit_eos(&mut self, component: &dyn Component, pool: &BufferPool) -> Result<bool> {
        if self.eos_sent {
            return Ok(false);
        }
        self.submit_marker(component, pool, BufferFlags::EOS)?;
        self.eos_sent = true;
        debug!(frames = self.submitted, "end of stream submitted");
        Ok(true)
    }

    /// Submits an empty buffer flagged as configuration, asking the
    /// component to emit the stream configuration ahead of any frame.
    pub fn submit_config_request(
        &mut self,
        component: &dyn Component,
        pool: &BufferPool,
    ) -> Result<()> {
        self.submit_marker(component, pool, BufferFlags::CODEC_CONFIG)
    }

    fn submit_marker(
        &mut self,
        component: &dyn Component,
        pool: &BufferPool,
        flags: BufferFlags,
    ) -> Result<()> {
        let mut header = pool
            .acquire(Direction::Input, Wait::Block)?
            .ok_or(Error::Closed)?;
        header.reset();
        header.flags = flags;
        pool.hand_over(Direction::Input, header, |header| {
            component.empty_this_buffer(header)
        })
        .map_err(|code| Error::BufferExchangeFailed {
            op: "empty_this_buffer",
            direction: Direction::Input,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Command, ErrorCode, Param, Rejected},
        dispatch::Shared,
        frame::PixelFormat,
    };
    use std::sync::Mutex;

    /// Keeps every buffer it is given, or refuses them all.
    #[derive(Default)]
    struct Holder {
        held: Mutex<Vec<BufferHeader>>,
        refreshes: Mutex<usize>,
        refuse: bool,
    }

    impl Component for Holder {
        fn send_command(&self, _: Command) -> Result<(), ErrorCode> {
            Ok(())
        }

        fn get_parameter(&self, _: &mut Param) -> Result<(), ErrorCode> {
            Err(ErrorCode::NOT_IMPLEMENTED)
        }

        fn set_parameter(&self, _: &Param) -> Result<(), ErrorCode> {
            Err(ErrorCode::NOT_IMPLEMENTED)
        }

        fn set_config(&self, _: &Config) -> Result<(), ErrorCode> {
            *self.refreshes.lock().unwrap() += 1;
            Ok(())
        }

        fn allocate_buffer(&self, _: PortIndex, _: usize) -> Result<BufferHeader, ErrorCode> {
            Err(ErrorCode::NOT_IMPLEMENTED)
        }

        fn free_buffer(&self, _: PortIndex, _: BufferHeader) -> Result<(), ErrorCode> {
            Ok(())
        }

        fn empty_this_buffer(&self, header: BufferHeader) -> Result<(), Rejected> {
            if self.refuse {
                return Err(Rejected {
                    code: ErrorCode::INSUFFICIENT_RESOURCES,
                    header,
                });
            }
            self.held.lock().unwrap().push(header);
            Ok(())
        }

        fn fill_this_buffer(&self, header: BufferHeader) -> Result<(), Rejected> {
            Err(Rejected {
                code: ErrorCode::NOT_IMPLEMENTED,
                header,
            })
        }
    }

    fn setup(zero_copy: bool) -> (BufferPool, FrameSubmitter) {
        let layout = ImageLayout::new(PixelFormat::Nv12, 16, 16);
        let mut pool = BufferPool::new(Shared::new());
        pool.open(Direction::Input, 2);
        pool.open(Direction::Output, 1);
        for id in 0..2 {
            pool.release(Direction::Input, BufferHeader::new(id, 0, layout.size));
        }
        let submitter = FrameSubmitter::new(layout, 1, zero_copy, Rational::new(1, 30));
        (pool, submitter)
    }

    fn frame(width: u32, height: u32, pts: i64) -> Arc<VideoFrame> {
        let size = ImageLayout::new(PixelFormat::Nv12, width as usize, height as usize).size;
        Arc::new(
            VideoFrame::packed(PixelFormat::Nv12, width, height, vec![200; size])
                .unwrap()
                .with_pts(pts),
        )
    }

    #[test]
    fn frame_fields_are_set() {
        let (pool, mut submitter) = setup(false);
        let component = Holder::default();
        let input = Arc::new(
            VideoFrame::packed(PixelFormat::Nv12, 16, 16, vec![200; 384])
                .unwrap()
                .with_pts(3)
                .with_picture_type(PictureType::Intra),
        );
        assert_eq!(
            submitter.submit(&component, &pool, &input).unwrap(),
            SubmitPath::InPlace
        );
        let held = component.held.lock().unwrap();
        let header = &held[0];
        assert_eq!(header.filled_len, 384);
        assert_eq!(header.flags, BufferFlags::END_OF_FRAME);
        assert_eq!(header.timestamp.as_micros(), 100_000);
        assert_eq!(header.payload(), input.data());
        assert_eq!(*component.refreshes.lock().unwrap(), 1);
        assert_eq!(submitter.submitted(), 1);
    }

    #[test]
    fn zero_copy_only_when_layout_matches() {
        let (pool, mut submitter) = setup(true);
        let component = Holder::default();
        let matching = frame(16, 16, 0);
        assert_eq!(
            submitter.submit(&component, &pool, &matching).unwrap(),
            SubmitPath::ZeroCopy
        );
        assert_eq!(Arc::strong_count(&matching), 2);

        let narrow = frame(8, 16, 1);
        assert_eq!(
            submitter.submit(&component, &pool, &narrow).unwrap(),
            SubmitPath::Scratch
        );
        let held = component.held.lock().unwrap();
        assert_eq!(&held[1].payload()[..8], &[200; 8]);
        assert_eq!(&held[1].payload()[8..16], &[0; 8]);
    }

    #[test]
    fn refused_frame_returns_header() {
        let (pool, mut submitter) = setup(false);
        let component = Holder {
            refuse: true,
            ..Default::default()
        };
        let err = submitter
            .submit(&component, &pool, &frame(16, 16, 0))
            .unwrap_err();
        assert!(err.is_recoverable());
        let stats = pool.stats(Direction::Input);
        assert_eq!((stats.queued, stats.in_flight), (2, 0));
        assert_eq!(submitter.submitted(), 0);
    }

    #[test]
    fn unrepresentable_pts_keeps_headers() {
        let (pool, mut submitter) = setup(false);
        let component = Holder::default();
        assert!(matches!(
            submitter.submit(&component, &pool, &frame(16, 16, i64::MAX)),
            Err(Error::InvalidFrame(_))
        ));
        assert_eq!(pool.stats(Direction::Input).queued, 2);
        assert!(component.held.lock().unwrap().is_empty());
    }

    #[test]
    fn mismatched_format_keeps_headers() {
        let (pool, mut submitter) = setup(false);
        let component = Holder::default();
        let planar = Arc::new(
            VideoFrame::packed(PixelFormat::Yuv420p, 16, 16, vec![0; 384]).unwrap(),
        );
        assert!(matches!(
            submitter.submit(&component, &pool, &planar),
            Err(Error::InvalidFrame(_))
        ));
        assert_eq!(pool.stats(Direction::Input).queued, 2);
    }

    #[test]
    fn eos_sent_once() {
        let (pool, mut submitter) = setup(false);
        let component = Holder::default();
        assert!(submitter.submit_eos(&component, &pool).unwrap());
        assert!(!submitter.submit_eos(&component, &pool).unwrap());
        assert!(matches!(
            submitter.submit(&component, &pool, &frame(16, 16, 0)),
            Err(Error::Closed)
        ));
        let held = component.held.lock().unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].flags, BufferFlags::EOS);
        assert_eq!(held[0].filled_len, 0);
    }
}
