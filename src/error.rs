// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error taxonomy for the encoder session.
//!
//! Initialization errors are surfaced once, after the session has been torn
//! down. Per-call errors (a single submit or collect) leave the session
//! usable. [`Error::SessionPoisoned`] is terminal for the session that
//! reported it.

use crate::backend::{Direction, ErrorCode, ParamKind, State};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no component available for role {role}: {reason}")]
    ComponentNotFound { role: String, reason: String },

    #[error("failed to acquire component handle for {name}: {code}")]
    HandleAcquisitionFailed { name: String, code: ErrorCode },

    #[error("component rejected parameter {param}: {code}")]
    ParameterRejected { param: ParamKind, code: ErrorCode },

    #[error("port negotiation failed: {0}")]
    PortNegotiationFailed(String),

    #[error("transition to {target} failed: {code}")]
    StateTransitionFailed { target: State, code: ErrorCode },

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: State, to: State },

    #[error("out of memory allocating {bytes} bytes")]
    MemoryExhausted { bytes: usize },

    #[error("{op} failed on {direction} buffer: {code}")]
    BufferExchangeFailed {
        op: &'static str,
        direction: Direction,
        code: ErrorCode,
    },

    #[error("session poisoned by asynchronous component error {0}")]
    SessionPoisoned(ErrorCode),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("session is closed")]
    Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error leaves the session usable for further calls.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ParameterRejected { .. }
                | Error::MemoryExhausted { .. }
                | Error::BufferExchangeFailed { .. }
                | Error::InvalidFrame(_)
        )
    }
}
