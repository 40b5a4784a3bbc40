// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use omx_encoder::{
    config::{Codec, KeyFrameInterval, Profile, Rotation, SessionConfig},
    frame::PixelFormat,
    time::Rational,
};
use std::path::PathBuf;

/// Output codec.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum CodecSetting {
    /// H.265 / HEVC
    Hevc,
    /// H.264 / AVC
    H264,
    /// MPEG-4 Part 2
    Mpeg4,
}

impl From<CodecSetting> for Codec {
    fn from(codec: CodecSetting) -> Self {
        match codec {
            CodecSetting::Hevc => Codec::Hevc,
            CodecSetting::H264 => Codec::H264,
            CodecSetting::Mpeg4 => Codec::Mpeg4,
        }
    }
}

/// Layout of the raw input frames.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum PixelSetting {
    /// Y plane followed by interleaved UV
    Nv12,
    /// Y, U and V planes
    Yuv420p,
}

impl From<PixelSetting> for PixelFormat {
    fn from(format: PixelSetting) -> Self {
        match format {
            PixelSetting::Nv12 => PixelFormat::Nv12,
            PixelSetting::Yuv420p => PixelFormat::Yuv420p,
        }
    }
}

/// Encoder profile.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum ProfileSetting {
    /// Component default
    Auto,
    /// H.264 Baseline
    Baseline,
    /// H.264 Main or HEVC Main
    Main,
    /// H.264 High
    High,
}

impl From<ProfileSetting> for Profile {
    fn from(profile: ProfileSetting) -> Self {
        match profile {
            ProfileSetting::Auto => Profile::Auto,
            ProfileSetting::Baseline => Profile::Baseline,
            ProfileSetting::Main => Profile::Main,
            ProfileSetting::High => Profile::High,
        }
    }
}

fn parse_rational(value: &str) -> Result<Rational, String> {
    let (num, den) = value.split_once('/').unwrap_or((value, "1"));
    let num = num
        .trim()
        .parse::<i64>()
        .map_err(|err| format!("numerator: {}", err))?;
    let den = den
        .trim()
        .parse::<i64>()
        .map_err(|err| format!("denominator: {}", err))?;
    let rational = Rational::new(num, den);
    if rational.is_valid() {
        Ok(rational)
    } else {
        Err(format!("{} is not a positive rational", value))
    }
}

fn parse_rotation(value: &str) -> Result<Rotation, String> {
    let degrees = value.parse::<u32>().map_err(|err| err.to_string())?;
    Rotation::try_from(degrees).map_err(|err| err.to_string())
}

/// Command-line arguments for the encoder tool.
///
/// Reads raw frames from `input`, encodes them with the software loopback
/// component and writes the elementary stream to `output`. Arguments can
/// be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// omx-encoder --size 1280 720 --codec h264 frames.nv12 out.h264
///
/// export CODEC=hevc
/// export GLOBAL_HEADER=true
/// omx-encoder --size 640 480 frames.nv12 out.hevc
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Raw input frames, back to back
    pub input: PathBuf,

    /// Annex-B elementary stream output
    pub output: PathBuf,

    /// Output codec
    #[arg(long, env = "CODEC", default_value = "hevc", value_enum)]
    pub codec: CodecSetting,

    /// Frame size in pixels (width height)
    #[arg(
        short,
        long,
        env = "SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Input pixel format
    #[arg(long, env = "PIXEL_FORMAT", default_value = "nv12", value_enum)]
    pub pixel_format: PixelSetting,

    /// Frame rate as frames per second or num/den
    #[arg(long, env = "FPS", default_value = "30", value_parser = parse_rational)]
    pub fps: Rational,

    /// Target bitrate in bits per second, 0 for the component default
    #[arg(short, long, env = "BITRATE", default_value = "5000000")]
    pub bitrate: u32,

    /// Frames between key frames
    #[arg(long, env = "GOP", default_value = "12")]
    pub gop: u32,

    /// Encoder profile
    #[arg(long, env = "PROFILE", default_value = "auto", value_enum)]
    pub profile: ProfileSetting,

    /// Rotation in degrees (0, 90, 180 or 270)
    #[arg(long, env = "ROTATION", default_value = "0", value_parser = parse_rotation)]
    pub rotation: Rotation,

    /// Write the stream configuration once ahead of the first packet
    #[arg(long, env = "GLOBAL_HEADER")]
    pub global_header: bool,

    /// Hand matching frames to the component without copying
    #[arg(long, env = "ZERO_COPY")]
    pub zero_copy: bool,

    /// Request a key frame every N frames through intra refresh, 0 disables
    #[arg(long, env = "FORCE_KEY", default_value = "0")]
    pub force_key: u32,

    /// Stop after this many frames
    #[arg(long, env = "FRAMES")]
    pub frames: Option<u64>,

    /// Component to load instead of the first one implementing the role
    #[arg(long, env = "COMPONENT")]
    pub component: Option<String>,

    /// Output buffers the loopback component offers
    #[arg(long, env = "OUTPUT_BUFFERS", default_value = "4")]
    pub output_buffers: u32,

    /// Largest payload the loopback component places in one output buffer
    #[arg(long, env = "MAX_CHUNK", default_value = "4096")]
    pub max_chunk: usize,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    pub fn width(&self) -> u32 {
        self.size.first().copied().unwrap_or_default()
    }

    pub fn height(&self) -> u32 {
        self.size.get(1).copied().unwrap_or_default()
    }
}

impl From<Args> for SessionConfig {
    fn from(args: Args) -> Self {
        let mut config = SessionConfig::new(args.codec.into(), args.width(), args.height())
            .with_frame_rate(args.fps)
            .with_time_base(args.fps.invert())
            .with_bit_rate(args.bitrate)
            .with_key_frame_interval(KeyFrameInterval::Frames(args.gop))
            .with_global_header(args.global_header)
            .with_zero_copy(args.zero_copy)
            .with_pixel_format(args.pixel_format.into());
        config.profile = args.profile.into();
        config.rotation = args.rotation;
        config.component_name = args.component;
        config
    }
}
