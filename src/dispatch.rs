// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The component's notification surface.
//!
//! [`CallbackDispatcher`] is registered with the component when the handle
//! is acquired and is invoked on the component's threads. It never blocks:
//! every notification becomes one non-blocking send on the lane of the
//! resource it concerns.

use crate::{
    backend::{Command, ComponentCallbacks, Direction, ErrorCode, Event},
    buffer::BufferHeader,
    pool::{Delivery, Lanes, Route, STATE_LANE_CAPACITY},
};
use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};
use tracing::{debug, error, info};

/// State shared between the session and the dispatcher.
pub struct Shared {
    /// First asynchronous error reported by the component, 0 when none.
    poison: AtomicU32,
    lanes: Lanes,
    in_flight: [AtomicUsize; 2],
}

impl Shared {
    /// Creates the shared state with the state lane open. Buffer lanes are
    /// opened once the port buffer counts are known.
    pub fn new() -> Arc<Self> {
        let lanes = Lanes::new();
        lanes.open(Route::State, STATE_LANE_CAPACITY);
        Arc::new(Self {
            poison: AtomicU32::new(0),
            lanes,
            in_flight: [AtomicUsize::new(0), AtomicUsize::new(0)],
        })
    }

    pub fn lanes(&self) -> &Lanes {
        &self.lanes
    }

    pub fn poisoned(&self) -> Option<ErrorCode> {
        match self.poison.load(Ordering::Acquire) {
            0 => None,
            code => Some(ErrorCode(code)),
        }
    }

    /// Records `code` and wakes every waiter. Only the first error poisons
    /// the session; later ones are still forwarded to the state lane.
    pub fn poison(&self, code: ErrorCode) {
        let raw = if code.0 == 0 { ErrorCode::UNDEFINED.0 } else { code.0 };
        let first = self
            .poison
            .compare_exchange(0, raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.lanes
            .deliver(Route::State, Delivery::Error(ErrorCode(raw)));
        if first {
            self.lanes.wake();
        }
    }

    pub fn in_flight(&self, direction: Direction) -> usize {
        self.in_flight[direction.index()].load(Ordering::Acquire)
    }

    pub(crate) fn started(&self, direction: Direction) {
        self.in_flight[direction.index()].fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn returned(&self, direction: Direction) {
        let _ = self.in_flight[direction.index()].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |count| count.checked_sub(1),
        );
    }

    fn complete(&self, direction: Direction, header: BufferHeader) {
        self.returned(direction);
        if !self.lanes.deliver(Route::of(direction), Delivery::Buffer(header)) {
            error!(%direction, "completed buffer could not be queued");
        }
    }
}

/// Routes component notifications into the session's lanes.
pub struct CallbackDispatcher {
    shared: Arc<Shared>,
}

impl CallbackDispatcher {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl ComponentCallbacks for CallbackDispatcher {
    fn event(&self, event: Event) {
        match event {
            Event::Error(code) => {
                error!(%code, "component error");
                self.shared.poison(code);
            }
            Event::CmdComplete(Command::StateSet(state)) => {
                debug!(%state, "state change confirmed");
                self.shared
                    .lanes
                    .deliver(Route::State, Delivery::State(state));
            }
            Event::CmdComplete(command) => {
                debug!(?command, "command complete");
            }
            Event::PortSettingsChanged(port) => {
                info!(port, "port settings changed");
            }
            Event::Other { kind, data1, data2 } => {
                debug!(kind, data1, data2, "unhandled event");
            }
        }
    }

    fn empty_buffer_done(&self, mut header: BufferHeader) {
        header.detach();
        self.shared.complete(Direction::Input, header);
    }

    fn fill_buffer_done(&self, header: BufferHeader) {
        self.shared.complete(Direction::Output, header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::State,
        buffer::Attachment,
        frame::{PixelFormat, VideoFrame},
    };

    #[test]
    fn state_confirmation_is_routed() {
        let shared = Shared::new();
        let dispatcher = CallbackDispatcher::new(shared.clone());
        dispatcher.event(Event::CmdComplete(Command::PortEnable(0)));
        dispatcher.event(Event::CmdComplete(Command::StateSet(State::Idle)));
        match shared.lanes().receive(Route::State, false).unwrap() {
            Some(Delivery::State(State::Idle)) => {}
            other => panic!("unexpected delivery {:?}", other),
        }
        assert!(shared.lanes().receive(Route::State, false).unwrap().is_none());
    }

    #[test]
    fn first_error_poisons() {
        let shared = Shared::new();
        let dispatcher = CallbackDispatcher::new(shared.clone());
        assert_eq!(shared.poisoned(), None);
        dispatcher.event(Event::Error(ErrorCode::HARDWARE));
        dispatcher.event(Event::Error(ErrorCode::UNDEFINED));
        assert_eq!(shared.poisoned(), Some(ErrorCode::HARDWARE));
        assert_eq!(shared.lanes().len(Route::State), 2);
    }

    #[test]
    fn completion_releases_frame() {
        let shared = Shared::new();
        shared.lanes().open(Route::Input, 2);
        let dispatcher = CallbackDispatcher::new(shared.clone());

        let frame = Arc::new(VideoFrame::packed(PixelFormat::Nv12, 2, 2, vec![0; 6]).unwrap());
        let mut header = BufferHeader::new(0, 0, 6);
        header.attach(Attachment::Frame(frame.clone()));
        shared.started(Direction::Input);
        dispatcher.empty_buffer_done(header);

        assert_eq!(Arc::strong_count(&frame), 1);
        assert_eq!(shared.in_flight(Direction::Input), 0);
        match shared.lanes().receive(Route::Input, false).unwrap() {
            Some(Delivery::Buffer(header)) => assert!(!header.is_attached()),
            other => panic!("unexpected delivery {:?}", other),
        }
    }
}
