// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Backend boundary of the encoder.
//!
//! The codec backend is an OpenMAX IL style core exposing a fixed function
//! table. The core half ([`Core`]) initialises the library and hands out
//! component handles, the component half ([`Component`]) carries the
//! per-instance commands, parameters and buffer exchange. Components report
//! back asynchronously, from threads this crate does not control, through
//! the three [`ComponentCallbacks`] registrations.
//!
//! Buffer headers move by value across this boundary. A header handed to
//! [`Component::empty_this_buffer`] or [`Component::fill_this_buffer`] is
//! owned by the component until it comes back through the matching
//! callback, so a header can never be tracked in two places at once.

use crate::buffer::BufferHeader;
use std::{fmt, sync::Arc};

pub type PortIndex = u32;

/// Component lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Invalid,
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    StateSet(State),
    Flush(PortIndex),
    PortDisable(PortIndex),
    PortEnable(PortIndex),
}

/// Error code reported by the backend, either as a call result or through
/// the asynchronous error event.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const INSUFFICIENT_RESOURCES: ErrorCode = ErrorCode(0x8000_1000);
    pub const UNDEFINED: ErrorCode = ErrorCode(0x8000_1001);
    pub const INVALID_COMPONENT_NAME: ErrorCode = ErrorCode(0x8000_1002);
    pub const COMPONENT_NOT_FOUND: ErrorCode = ErrorCode(0x8000_1003);
    pub const BAD_PARAMETER: ErrorCode = ErrorCode(0x8000_1005);
    pub const NOT_IMPLEMENTED: ErrorCode = ErrorCode(0x8000_1006);
    pub const HARDWARE: ErrorCode = ErrorCode(0x8000_1009);
    pub const INVALID_STATE: ErrorCode = ErrorCode(0x8000_100A);
    pub const NO_MORE: ErrorCode = ErrorCode(0x8000_100E);
    pub const SAME_STATE: ErrorCode = ErrorCode(0x8000_1012);
    pub const INCORRECT_STATE_TRANSITION: ErrorCode = ErrorCode(0x8000_1017);
    pub const INCORRECT_STATE_OPERATION: ErrorCode = ErrorCode(0x8000_1018);
    pub const UNSUPPORTED_SETTING: ErrorCode = ErrorCode(0x8000_1019);
    pub const UNSUPPORTED_INDEX: ErrorCode = ErrorCode(0x8000_101A);
    pub const BAD_PORT_INDEX: ErrorCode = ErrorCode(0x8000_101B);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::INSUFFICIENT_RESOURCES => "InsufficientResources",
            Self::UNDEFINED => "Undefined",
            Self::INVALID_COMPONENT_NAME => "InvalidComponentName",
            Self::COMPONENT_NOT_FOUND => "ComponentNotFound",
            Self::BAD_PARAMETER => "BadParameter",
            Self::NOT_IMPLEMENTED => "NotImplemented",
            Self::HARDWARE => "Hardware",
            Self::INVALID_STATE => "InvalidState",
            Self::NO_MORE => "NoMore",
            Self::SAME_STATE => "SameState",
            Self::INCORRECT_STATE_TRANSITION => "IncorrectStateTransition",
            Self::INCORRECT_STATE_OPERATION => "IncorrectStateOperation",
            Self::UNSUPPORTED_SETTING => "UnsupportedSetting",
            Self::UNSUPPORTED_INDEX => "UnsupportedIndex",
            Self::BAD_PORT_INDEX => "BadPortIndex",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{:#x} ({})", self.0, name),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Asynchronous notifications delivered through
/// [`ComponentCallbacks::event`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Error(ErrorCode),
    CmdComplete(Command),
    PortSettingsChanged(PortIndex),
    Other { kind: u32, data1: u32, data2: u32 },
}

/// Data direction of a port, and of the buffer queue that serves it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    pub fn index(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    Unused,
    Yuv420Planar,
    Yuv420PackedPlanar,
    Yuv420SemiPlanar,
    Other(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compression {
    Unused,
    Mpeg4,
    Avc,
    Hevc,
}

/// Video half of a port definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub frame_width: u32,
    pub frame_height: u32,
    pub stride: u32,
    pub slice_height: u32,
    pub bitrate: u32,
    /// Frame rate in Q16 fixed point.
    pub framerate_q16: u32,
    pub color_format: ColorFormat,
    pub compression: Compression,
    pub error_concealment: bool,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            frame_width: 0,
            frame_height: 0,
            stride: 0,
            slice_height: 0,
            bitrate: 0,
            framerate_q16: 0,
            color_format: ColorFormat::Unused,
            compression: Compression::Unused,
            error_concealment: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    pub index: PortIndex,
    pub direction: Direction,
    pub enabled: bool,
    pub populated: bool,
    pub buffer_count_actual: u32,
    pub buffer_count_min: u32,
    pub buffer_size: usize,
    pub video: VideoFormat,
}

impl PortDefinition {
    /// Query template for the given port index.
    pub fn query(index: PortIndex) -> Self {
        Self {
            index,
            direction: Direction::Input,
            enabled: false,
            populated: false,
            buffer_count_actual: 0,
            buffer_count_min: 0,
            buffer_size: 0,
            video: VideoFormat::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlRate {
    Disable,
    Variable,
    Constant,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AvcProfile {
    Baseline,
    Main,
    High,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HevcProfile {
    Main,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvcParams {
    pub port: PortIndex,
    pub p_frames: u32,
    pub b_frames: u32,
    pub profile: Option<AvcProfile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HevcParams {
    pub port: PortIndex,
    pub key_frame_interval: u32,
    pub profile: Option<HevcProfile>,
}

/// Typed parameter structures understood by `get_parameter` and
/// `set_parameter`. Each variant corresponds to one parameter index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    ComponentRole(String),
    StoreMetaData {
        port: PortIndex,
        enabled: bool,
    },
    VideoInit {
        start_port: PortIndex,
        ports: u32,
    },
    PortDefinition(PortDefinition),
    VideoPortFormat {
        port: PortIndex,
        index: u32,
        color_format: ColorFormat,
        compression: Compression,
    },
    Bitrate {
        port: PortIndex,
        control: ControlRate,
        target: u32,
    },
    Avc(AvcParams),
    Hevc(HevcParams),
    Rotation {
        port: PortIndex,
        degrees: i32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamKind {
    ComponentRole,
    StoreMetaData,
    VideoInit,
    PortDefinition,
    VideoPortFormat,
    Bitrate,
    Avc,
    Hevc,
    Rotation,
}

impl Param {
    pub fn kind(&self) -> ParamKind {
        match self {
            Param::ComponentRole(_) => ParamKind::ComponentRole,
            Param::StoreMetaData { .. } => ParamKind::StoreMetaData,
            Param::VideoInit { .. } => ParamKind::VideoInit,
            Param::PortDefinition(_) => ParamKind::PortDefinition,
            Param::VideoPortFormat { .. } => ParamKind::VideoPortFormat,
            Param::Bitrate { .. } => ParamKind::Bitrate,
            Param::Avc(_) => ParamKind::Avc,
            Param::Hevc(_) => ParamKind::Hevc,
            Param::Rotation { .. } => ParamKind::Rotation,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Runtime configuration requests issued while executing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Config {
    /// Ask the encoder to make the next coded picture a sync frame.
    IntraRefresh { port: PortIndex },
}

/// A buffer the component refused, handed back so it can be returned to
/// its pool.
#[derive(Debug)]
pub struct Rejected {
    pub code: ErrorCode,
    pub header: BufferHeader,
}

/// Callback registrations handed to [`Core::get_handle`].
///
/// Implementations are invoked from the component's own threads and must
/// neither block nor call back into the component.
pub trait ComponentCallbacks: Send + Sync {
    fn event(&self, event: Event);

    /// An input buffer has been consumed.
    fn empty_buffer_done(&self, header: BufferHeader);

    /// An output buffer has been filled.
    fn fill_buffer_done(&self, header: BufferHeader);
}

/// Core half of the function table.
pub trait Core: Send + Sync {
    fn initialize(&self) -> Result<(), ErrorCode>;

    fn deinitialize(&self) -> Result<(), ErrorCode>;

    /// Names of the components implementing `role`, best match first.
    fn components_of_role(&self, role: &str) -> Vec<String>;

    fn get_handle(
        &self,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Box<dyn Component>, ErrorCode>;

    fn free_handle(&self, component: Box<dyn Component>) -> Result<(), ErrorCode>;
}

/// Component half of the function table.
pub trait Component: Send {
    fn send_command(&self, command: Command) -> Result<(), ErrorCode>;

    fn get_parameter(&self, param: &mut Param) -> Result<(), ErrorCode>;

    fn set_parameter(&self, param: &Param) -> Result<(), ErrorCode>;

    fn set_config(&self, config: &Config) -> Result<(), ErrorCode>;

    fn allocate_buffer(&self, port: PortIndex, size: usize) -> Result<BufferHeader, ErrorCode>;

    fn free_buffer(&self, port: PortIndex, header: BufferHeader) -> Result<(), ErrorCode>;

    fn empty_this_buffer(&self, header: BufferHeader) -> Result<(), Rejected>;

    fn fill_this_buffer(&self, header: BufferHeader) -> Result<(), Rejected>;
}
