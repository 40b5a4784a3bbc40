// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Buffer queues shared between the caller and the component.
//!
//! Every notification the component produces travels through one of three
//! bounded lanes, one per [`Route`]: free input headers, completed output
//! headers, and state changes. Each lane has a single consumer on the
//! caller's thread, so headers come out in exactly the order the component
//! completed them. The lanes are kept in a fixed array indexed by route and
//! are opened and closed by iterating it.
//!
//! The buffer lanes are sized to hold every header of their direction plus
//! one wake-up, so delivering a header from a callback never blocks and
//! never fails while the session is open.

use crate::{
    backend::{Direction, ErrorCode, Rejected, State},
    buffer::BufferHeader,
    dispatch::Shared,
    error::{Error, Result},
};
use kanal::{Receiver, Sender};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

/// Room reserved on each buffer lane for the poison wake-up.
pub const WAKE_SLOTS: usize = 1;

/// Capacity of the state lane.
pub const STATE_LANE_CAPACITY: usize = 16;

/// The shared resources a notification can be routed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    Input,
    Output,
    State,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Input, Route::Output, Route::State];

    pub fn index(self) -> usize {
        match self {
            Route::Input => 0,
            Route::Output => 1,
            Route::State => 2,
        }
    }

    pub fn of(direction: Direction) -> Route {
        match direction {
            Direction::Input => Route::Input,
            Direction::Output => Route::Output,
        }
    }
}

/// A message travelling on a lane.
#[derive(Debug)]
pub enum Delivery {
    Buffer(BufferHeader),
    State(State),
    Error(ErrorCode),
    /// Wakes a blocked consumer so it re-checks the poison cell.
    Wake,
}

/// How long an acquire may wait for a header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately when the queue is empty.
    Poll,
    /// Wait for a header, failing fast once the session is poisoned.
    Block,
    /// Wait for a header regardless of poison. Used by teardown to reclaim
    /// every header that was allocated.
    Drain,
}

struct Lane {
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
}

/// The array of lanes, one per [`Route`].
pub struct Lanes {
    lanes: [OnceLock<Lane>; 3],
}

impl Default for Lanes {
    fn default() -> Self {
        Self::new()
    }
}

impl Lanes {
    pub fn new() -> Self {
        Self {
            lanes: [OnceLock::new(), OnceLock::new(), OnceLock::new()],
        }
    }

    /// Opens the lane for `route` with room for `capacity` messages.
    /// Returns `false` if the lane was already open.
    pub fn open(&self, route: Route, capacity: usize) -> bool {
        let mut opened = false;
        self.lanes[route.index()].get_or_init(|| {
            opened = true;
            let (sender, receiver) = kanal::bounded(capacity);
            Lane { sender, receiver }
        });
        if opened {
            debug!(?route, capacity, "lane opened");
        }
        opened
    }

    pub fn is_open(&self, route: Route) -> bool {
        self.lanes[route.index()]
            .get()
            .is_some_and(|lane| !lane.sender.is_closed())
    }

    fn lane(&self, route: Route) -> Result<&Lane> {
        self.lanes[route.index()].get().ok_or(Error::Closed)
    }

    /// Hands `delivery` to the consumer of `route` without blocking.
    /// Returns `false` if the lane is missing, full or closed, in which
    /// case the message is dropped.
    pub fn deliver(&self, route: Route, delivery: Delivery) -> bool {
        let Some(lane) = self.lanes[route.index()].get() else {
            warn!(?route, ?delivery, "delivery before lane was opened");
            return false;
        };
        match lane.sender.try_send(delivery) {
            Ok(true) => true,
            Ok(false) => {
                error!(?route, "lane full, delivery dropped");
                false
            }
            Err(_) => {
                debug!(?route, "lane closed, delivery dropped");
                false
            }
        }
    }

    /// Wakes the consumers of both buffer lanes.
    pub fn wake(&self) {
        for route in [Route::Input, Route::Output] {
            if let Some(lane) = self.lanes[route.index()].get() {
                let _ = lane.sender.try_send(Delivery::Wake);
            }
        }
    }

    /// Takes the next message from `route`, waiting when `block` is set.
    /// Returns `Ok(None)` only when not blocking and the lane is empty.
    pub fn receive(&self, route: Route, block: bool) -> Result<Option<Delivery>> {
        let lane = self.lane(route)?;
        if block {
            lane.receiver.recv().map(Some).map_err(|_| Error::Closed)
        } else {
            lane.receiver.try_recv().map_err(|_| Error::Closed)
        }
    }

    pub fn len(&self, route: Route) -> usize {
        self.lanes[route.index()]
            .get()
            .map_or(0, |lane| lane.receiver.len())
    }

    /// Closes every open lane, waking anything blocked on them.
    pub fn close(&self) {
        for route in Route::ALL {
            if let Some(lane) = self.lanes[route.index()].get() {
                let _ = lane.sender.close();
            }
        }
    }
}

/// Snapshot of one direction of the pool.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Headers waiting in the queue (free inputs, completed outputs).
    pub queued: usize,
    /// Headers currently owned by the component.
    pub in_flight: usize,
    /// Headers allocated for the session.
    pub total: usize,
}

/// Input and output header queues.
pub struct BufferPool {
    shared: Arc<Shared>,
    totals: [usize; 2],
}

impl BufferPool {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            totals: [0; 2],
        }
    }

    /// Opens the queue for `direction`, sized for `total` headers.
    pub fn open(&mut self, direction: Direction, total: usize) {
        self.totals[direction.index()] = total;
        self.shared
            .lanes()
            .open(Route::of(direction), total + WAKE_SLOTS);
    }

    pub fn total(&self, direction: Direction) -> usize {
        self.totals[direction.index()]
    }

    /// Removes the head of the queue for `direction`.
    ///
    /// # Errors
    ///
    /// [`Error::SessionPoisoned`] when blocking on a poisoned session and
    /// [`Error::Closed`] once the queue has been closed.
    pub fn acquire(&self, direction: Direction, wait: Wait) -> Result<Option<BufferHeader>> {
        let route = Route::of(direction);
        loop {
            if wait == Wait::Block {
                if let Some(code) = self.shared.poisoned() {
                    return Err(Error::SessionPoisoned(code));
                }
            }
            let delivery = self
                .shared
                .lanes()
                .receive(route, wait != Wait::Poll)?;
            match delivery {
                None => return Ok(None),
                Some(Delivery::Buffer(header)) => return Ok(Some(header)),
                Some(Delivery::Wake) => continue,
                Some(other) => {
                    warn!(?direction, ?other, "unexpected delivery on buffer lane");
                }
            }
        }
    }

    /// Appends `header` to the queue for `direction`.
    pub fn release(&self, direction: Direction, header: BufferHeader) {
        if !self
            .shared
            .lanes()
            .deliver(Route::of(direction), Delivery::Buffer(header))
        {
            error!(%direction, "buffer header lost on release");
        }
    }

    /// Passes `header` to the component through `exchange`, accounting for
    /// it as in flight. A header the component refuses is put back on the
    /// queue and the component's error code returned.
    pub fn hand_over<F>(
        &self,
        direction: Direction,
        header: BufferHeader,
        exchange: F,
    ) -> std::result::Result<(), ErrorCode>
    where
        F: FnOnce(BufferHeader) -> std::result::Result<(), Rejected>,
    {
        self.shared.started(direction);
        match exchange(header) {
            Ok(()) => Ok(()),
            Err(Rejected { code, header }) => {
                self.shared.returned(direction);
                self.release(direction, header);
                Err(code)
            }
        }
    }

    pub fn stats(&self, direction: Direction) -> PoolStats {
        PoolStats {
            queued: self.shared.lanes().len(Route::of(direction)),
            in_flight: self.shared.in_flight(direction),
            total: self.totals[direction.index()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::ComponentCallbacks, dispatch::CallbackDispatcher};
    use std::{thread, time::Duration};

    fn pool(inputs: usize, outputs: usize) -> (Arc<Shared>, BufferPool) {
        let shared = Shared::new();
        let mut pool = BufferPool::new(shared.clone());
        pool.open(Direction::Input, inputs);
        pool.open(Direction::Output, outputs);
        (shared, pool)
    }

    #[test]
    fn release_preserves_order_and_identity() {
        let (_, pool) = pool(4, 1);
        for id in 0..4 {
            pool.release(Direction::Input, BufferHeader::new(id, 0, 16));
        }
        let ids: Vec<usize> = (0..4)
            .map(|_| {
                pool.acquire(Direction::Input, Wait::Poll)
                    .unwrap()
                    .unwrap()
                    .id()
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(pool.acquire(Direction::Input, Wait::Poll).unwrap().is_none());
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let (shared, pool) = pool(1, 1);
        let dispatcher = CallbackDispatcher::new(shared.clone());
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            dispatcher.empty_buffer_done(BufferHeader::new(7, 0, 16));
        });
        let header = pool.acquire(Direction::Input, Wait::Block).unwrap().unwrap();
        assert_eq!(header.id(), 7);
        worker.join().unwrap();
    }

    #[test]
    fn poison_wakes_blocked_acquire() {
        let (shared, pool) = pool(1, 1);
        let dispatcher = CallbackDispatcher::new(shared.clone());
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            dispatcher.event(crate::backend::Event::Error(ErrorCode::HARDWARE));
        });
        let err = pool.acquire(Direction::Output, Wait::Block).unwrap_err();
        assert!(matches!(err, Error::SessionPoisoned(ErrorCode::HARDWARE)));
        worker.join().unwrap();

        // Draining ignores the poison and still hands out headers.
        pool.release(Direction::Output, BufferHeader::new(1, 1, 16));
        assert!(pool.acquire(Direction::Output, Wait::Drain).unwrap().is_some());
    }

    #[test]
    fn rejected_hand_over_returns_header() {
        let (_, pool) = pool(1, 1);
        let header = BufferHeader::new(3, 0, 16);
        let code = pool
            .hand_over(Direction::Input, header, |header| {
                Err(Rejected {
                    code: ErrorCode::INCORRECT_STATE_OPERATION,
                    header,
                })
            })
            .unwrap_err();
        assert_eq!(code, ErrorCode::INCORRECT_STATE_OPERATION);
        assert_eq!(pool.stats(Direction::Input).in_flight, 0);
        assert_eq!(
            pool.acquire(Direction::Input, Wait::Poll).unwrap().unwrap().id(),
            3
        );
    }

    #[test]
    fn in_flight_accounting() {
        let (shared, pool) = pool(2, 1);
        let dispatcher = CallbackDispatcher::new(shared);
        let mut held = None;
        pool.hand_over(Direction::Input, BufferHeader::new(0, 0, 8), |header| {
            held = Some(header);
            Ok(())
        })
        .unwrap();
        let stats = pool.stats(Direction::Input);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.total, 2);

        dispatcher.empty_buffer_done(held.take().unwrap());
        let stats = pool.stats(Direction::Input);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.queued, 1);
    }

    #[test]
    fn closed_lane_fails_acquire() {
        let (shared, pool) = pool(1, 1);
        shared.lanes().close();
        assert!(matches!(
            pool.acquire(Direction::Input, Wait::Drain),
            Err(Error::Closed)
        ));
        assert!(!shared.lanes().is_open(Route::Input));
    }
}
