// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # OpenMAX IL Video Encoder Driver
//!
//! This library drives an OpenMAX IL style hardware video encoder component
//! to turn raw video frames into HEVC, H.264 or MPEG-4 Part 2 elementary
//! stream packets.
//!
//! ## Features
//!
//! - **Component discovery**: Resolve an encoder component by role through
//!   the core, or use an explicitly named one.
//! - **Port negotiation**: Colour format, frame geometry, stride, buffer
//!   counts, bitrate, GOP length, profile and rotation.
//! - **Asynchronous buffer exchange**: The component completes buffers from
//!   its own threads; completions are queued per direction and consumed on
//!   the caller's thread.
//! - **Zero-copy input**: Frames already laid out like the input port are
//!   handed to the component in place.
//! - **Out-of-band configuration**: Parameter sets collected as extradata
//!   before the first frame when a global header is requested.
//! - **Loopback component**: A software component for development and
//!   testing without encoder hardware.
//!
//! ## Example
//!
//! ```no_run
//! use omx_encoder::{
//!     frame::{PixelFormat, VideoFrame},
//!     loopback::{LoopbackCore, LoopbackOptions},
//!     Codec, Session, SessionConfig,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let core = LoopbackCore::new(LoopbackOptions::default());
//! let config = SessionConfig::new(Codec::H264, 1280, 720).with_global_header(true);
//! let mut session = Session::open(core, config)?;
//! println!("extradata: {} bytes", session.extradata().len());
//!
//! let frame = VideoFrame::packed(PixelFormat::Nv12, 1280, 720, vec![0; 1280 * 1080])?;
//! if let Some(packet) = session.encode(Some(&Arc::new(frame)))? {
//!     println!("packet pts {} key {}", packet.pts, packet.key);
//! }
//! while let Some(packet) = session.encode(None)? {
//!     println!("packet pts {} key {}", packet.pts, packet.key);
//! }
//! session.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! A [`Session`] is driven from one thread. The component's callbacks only
//! touch the shared completion queues and the poison cell, never the
//! session itself.

pub mod backend;
pub mod buffer;
pub mod collect;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod loader;
pub mod loopback;
pub mod pool;
pub mod session;
pub mod state;
pub mod submit;
pub mod time;

pub use collect::Packet;
pub use config::{Codec, KeyFrameInterval, Profile, Rotation, SessionConfig};
pub use error::{Error, Result};
pub use frame::{PictureType, PixelFormat, VideoFrame};
pub use session::Session;
pub use submit::SubmitPath;
pub use time::Rational;
