// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Component lifecycle.
//!
//! The component moves `Loaded -> Idle -> Executing` on the way up and
//! `Executing -> Idle -> Loaded` on the way down; no other transition is
//! issued. A transition is split in two halves, [`StateMachine::begin`]
//! sending the command and [`StateMachine::wait`] blocking on the state
//! lane until the component confirms it or reports an error, so that the
//! session can allocate buffers between the two as `Loaded -> Idle`
//! requires.

use crate::{
    backend::{Command, Component, ErrorCode, State},
    dispatch::Shared,
    error::{Error, Result},
    pool::{Delivery, Route},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What the caller side knows about the component's lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateRecord {
    /// Last state the component confirmed.
    pub state: State,
    /// Last asynchronous error observed while waiting.
    pub error: Option<ErrorCode>,
    /// Target of the command sent but not yet confirmed.
    pub pending: Option<State>,
}

pub struct StateMachine {
    shared: Arc<Shared>,
    record: StateRecord,
}

impl StateMachine {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            record: StateRecord {
                state: State::Loaded,
                error: None,
                pending: None,
            },
        }
    }

    pub fn state(&self) -> State {
        self.record.state
    }

    pub fn pending(&self) -> Option<State> {
        self.record.pending
    }

    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    pub fn is_legal(from: State, to: State) -> bool {
        matches!(
            (from, to),
            (State::Loaded, State::Idle)
                | (State::Idle, State::Executing)
                | (State::Executing, State::Idle)
                | (State::Idle, State::Loaded)
        )
    }

    /// Sends the command moving the component to `target`. Returns
    /// `Ok(false)` without touching the component when it is already there.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalTransition`] when `target` is not reachable from the
    /// current state or another command is still outstanding, and
    /// [`Error::StateTransitionFailed`] when the component refuses the
    /// command.
    pub fn begin(&mut self, component: &dyn Component, target: State) -> Result<bool> {
        let from = self.record.state;
        if let Some(pending) = self.record.pending {
            warn!(%pending, %target, "transition already outstanding");
            return Err(Error::IllegalTransition { from, to: target });
        }
        if from == target {
            return Ok(false);
        }
        if !Self::is_legal(from, target) {
            return Err(Error::IllegalTransition { from, to: target });
        }
        debug!(%from, %target, "sending state command");
        component
            .send_command(Command::StateSet(target))
            .map_err(|code| Error::StateTransitionFailed { target, code })?;
        self.record.pending = Some(target);
        Ok(true)
    }

    /// Blocks until the component confirms `target`.
    ///
    /// # Errors
    ///
    /// [`Error::StateTransitionFailed`] as soon as the component reports an
    /// error or the session is already poisoned.
    pub fn wait(&mut self, target: State) -> Result<()> {
        loop {
            if self.record.state == target {
                self.record.pending = None;
                return Ok(());
            }
            if let Some(code) = self.shared.poisoned() {
                return Err(self.failed(target, code));
            }
            match self.shared.lanes().receive(Route::State, true)? {
                Some(Delivery::State(state)) => self.observe(state),
                Some(Delivery::Error(code)) => return Err(self.failed(target, code)),
                _ => {}
            }
        }
    }

    /// Issues and waits for a transition in one step.
    #[instrument(skip(self, component), fields(from = %self.record.state))]
    pub fn transition(&mut self, component: &dyn Component, target: State) -> Result<()> {
        if self.begin(component, target)? {
            self.wait(target)?;
        }
        Ok(())
    }

    /// Waits for `target` during teardown. Errors already recorded are not
    /// held against the transition; only one reported while waiting fails
    /// it.
    pub fn settle(&mut self, target: State) -> Result<()> {
        while let Some(delivery) = self.shared.lanes().receive(Route::State, false)? {
            match delivery {
                Delivery::State(state) => self.observe(state),
                Delivery::Error(code) => {
                    debug!(%code, "absorbing earlier component error");
                    self.record.error = Some(code);
                }
                _ => {}
            }
        }
        loop {
            if self.record.state == target {
                self.record.pending = None;
                return Ok(());
            }
            match self.shared.lanes().receive(Route::State, true)? {
                Some(Delivery::State(state)) => self.observe(state),
                Some(Delivery::Error(code)) => return Err(self.failed(target, code)),
                _ => {}
            }
        }
    }

    fn observe(&mut self, state: State) {
        debug!(from = %self.record.state, to = %state, "state observed");
        self.record.state = state;
        if self.record.pending == Some(state) {
            self.record.pending = None;
        }
    }

    fn failed(&mut self, target: State, code: ErrorCode) -> Error {
        self.record.error = Some(code);
        self.record.pending = None;
        Error::StateTransitionFailed { target, code }
    }
}
