// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    backend::{AvcProfile, Compression, HevcProfile},
    error::{Error, Result},
    frame::PixelFormat,
    time::Rational,
};
use std::fmt;

/// Coded output format, selecting the component role to load.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    #[default]
    Hevc,
    H264,
    Mpeg4,
}

impl Codec {
    /// Standard component role implementing this codec.
    pub fn role(self) -> &'static str {
        match self {
            Codec::Hevc => "video_encoder.hevc",
            Codec::H264 => "video_encoder.avc",
            Codec::Mpeg4 => "video_encoder.mpeg4",
        }
    }

    pub fn compression(self) -> Compression {
        match self {
            Codec::Hevc => Compression::Hevc,
            Codec::H264 => Compression::Avc,
            Codec::Mpeg4 => Compression::Mpeg4,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Hevc => f.write_str("hevc"),
            Codec::H264 => f.write_str("h264"),
            Codec::Mpeg4 => f.write_str("mpeg4"),
        }
    }
}

/// Encoder profile request. `Auto` leaves the component default in place.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Auto,
    Baseline,
    Main,
    High,
}

impl Profile {
    pub fn avc(self) -> Option<AvcProfile> {
        match self {
            Profile::Auto => None,
            Profile::Baseline => Some(AvcProfile::Baseline),
            Profile::Main => Some(AvcProfile::Main),
            Profile::High => Some(AvcProfile::High),
        }
    }

    /// HEVC only defines Main among the supported profiles.
    pub fn hevc(self) -> Option<HevcProfile> {
        match self {
            Profile::Main => Some(HevcProfile::Main),
            _ => None,
        }
    }
}

/// Distance between key frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyFrameInterval {
    /// Every `n` frames; 0 keeps the component's GOP default.
    Frames(u32),
    /// Every `n` seconds, converted to frames using the frame rate.
    Seconds(u32),
}

impl Default for KeyFrameInterval {
    fn default() -> Self {
        KeyFrameInterval::Frames(12)
    }
}

impl KeyFrameInterval {
    /// Interval in frames, 0 when the component default should be kept.
    pub fn frames(self, frame_rate: Rational) -> u32 {
        match self {
            KeyFrameInterval::Frames(n) => n,
            KeyFrameInterval::Seconds(secs) if frame_rate.is_valid() => {
                let frames = (secs as i64 * frame_rate.num) / frame_rate.den;
                frames.clamp(0, u32::MAX as i64) as u32
            }
            KeyFrameInterval::Seconds(_) => 0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = Error;

    fn try_from(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(Error::InvalidConfig(format!(
                "rotation must be 0, 90, 180 or 270, not {}",
                degrees
            ))),
        }
    }
}

/// Parameters of one encoding session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    /// Frames per second. When unset the inverse of `time_base` is used.
    pub frame_rate: Option<Rational>,
    /// Seconds per tick of the frame and packet timestamps.
    pub time_base: Rational,
    /// Target bit rate in bits per second, 0 keeps the component default.
    pub bit_rate: u32,
    pub key_frame_interval: KeyFrameInterval,
    pub rotation: Rotation,
    pub profile: Profile,
    /// Collect the stream configuration up front instead of in-band.
    pub global_header: bool,
    /// Hand matching frames to the component without copying.
    pub zero_copy: bool,
    pub pixel_format: PixelFormat,
    /// Load this component instead of the first one implementing the role.
    pub component_name: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Hevc,
            width: 1920,
            height: 1080,
            frame_rate: Some(Rational::new(30, 1)),
            time_base: Rational::new(1, 30),
            bit_rate: 5_000_000,
            key_frame_interval: KeyFrameInterval::default(),
            rotation: Rotation::Deg0,
            profile: Profile::Auto,
            global_header: false,
            zero_copy: false,
            pixel_format: PixelFormat::Nv12,
            component_name: None,
        }
    }
}

impl SessionConfig {
    pub fn new(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_key_frame_interval(mut self, interval: KeyFrameInterval) -> Self {
        self.key_frame_interval = interval;
        self
    }

    pub fn with_global_header(mut self, global_header: bool) -> Self {
        self.global_header = global_header;
        self
    }

    pub fn with_zero_copy(mut self, zero_copy: bool) -> Self {
        self.zero_copy = zero_copy;
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.component_name = Some(name.into());
        self
    }

    /// Checks the parameters that cannot be negotiated away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for empty dimensions, a time base
    /// or frame rate that is not strictly positive, or a profile the codec
    /// does not define.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        if !self.time_base.is_valid() {
            return Err(Error::InvalidConfig(format!(
                "invalid time base {}",
                self.time_base
            )));
        }
        if let Some(rate) = self.frame_rate {
            if !rate.is_valid() {
                return Err(Error::InvalidConfig(format!("invalid frame rate {}", rate)));
            }
        }
        match (self.codec, self.profile) {
            (_, Profile::Auto) | (Codec::H264, _) | (Codec::Hevc, Profile::Main) => Ok(()),
            (codec, profile) => Err(Error::InvalidConfig(format!(
                "profile {:?} is not available for {}",
                profile, codec
            ))),
        }
    }

    /// Frames per second, falling back to the inverse of the time base.
    pub fn effective_frame_rate(&self) -> Rational {
        self.frame_rate.unwrap_or(self.time_base.invert())
    }

    /// Frame rate in the component's Q16 fixed point.
    pub fn framerate_q16(&self) -> u32 {
        self.effective_frame_rate().to_q16()
    }

    pub fn key_frame_frames(&self) -> u32 {
        self.key_frame_interval.frames(self.effective_frame_rate())
    }
}
