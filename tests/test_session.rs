// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use omx_encoder::{
    backend::{ColorFormat, Command, Direction, ErrorCode, Param, ParamKind, State},
    buffer::BufferFlags,
    frame::{ImageLayout, PictureType, PixelFormat, VideoFrame},
    loopback::{parse_frame, Faults, LoopbackCore, LoopbackOptions},
    pool::PoolStats,
    Codec, Error, KeyFrameInterval, Packet, Rational, Rotation, Session, SessionConfig,
    SubmitPath,
};
use serial_test::serial;
use std::{error::Error as StdError, sync::Arc, time::Duration};

fn frame(format: PixelFormat, width: u32, height: u32, pts: i64) -> Arc<VideoFrame> {
    let size = ImageLayout::new(format, width as usize, height as usize).size;
    let data = (0..size).map(|i| (i % 251) as u8).collect();
    Arc::new(
        VideoFrame::packed(format, width, height, data)
            .unwrap()
            .with_pts(pts),
    )
}

fn nv12(pts: i64) -> Arc<VideoFrame> {
    frame(PixelFormat::Nv12, 64, 32, pts)
}

fn drain(session: &mut Session) -> Result<Vec<Packet>, Error> {
    let mut packets = Vec::new();
    while let Some(packet) = session.flush()? {
        packets.push(packet);
    }
    Ok(packets)
}

fn checksum(frame: &VideoFrame) -> u32 {
    frame
        .data()
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
}

#[test]
#[serial]
fn test_packet_spans_output_buffers() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        max_chunk: 16,
        frame_bytes: 48,
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;

    let input = nv12(0);
    assert_eq!(session.send_frame(&input)?, SubmitPath::InPlace);
    let packets = drain(&mut session)?;
    assert_eq!(packets.len(), 1);
    assert!(session.is_eos());
    assert!(session.flush()?.is_none());
    session.close()?;

    let packet = &packets[0];
    assert!(packet.key);
    assert_eq!(packet.pts, 0);
    assert_eq!(packet.dts, packet.pts);

    let report = core.report();
    let expected: Vec<u8> = report
        .chunks
        .iter()
        .filter(|(flags, _)| !flags.contains(BufferFlags::EOS))
        .flat_map(|(_, data)| data.iter().copied())
        .collect();
    assert!(report.chunks.len() > 5, "frame should span several buffers");
    assert_eq!(packet.data, expected);

    // In-band configuration precedes the picture.
    assert_eq!(&packet.data[..6], &[0, 0, 0, 1, 0x40, 0x01]);
    assert_eq!(
        parse_frame(&packet.data),
        Some((0, input.data().len() as u32, checksum(&input)))
    );
    Ok(())
}

#[test]
#[serial]
fn test_global_header_collected_at_open() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let config = SessionConfig::new(Codec::H264, 64, 32).with_global_header(true);
    let mut session = Session::open(core.clone(), config)?;

    let extradata = session.extradata().to_vec();
    let configured: Vec<u8> = core
        .report()
        .chunks
        .iter()
        .filter(|(flags, _)| flags.contains(BufferFlags::CODEC_CONFIG))
        .flat_map(|(_, data)| data.iter().copied())
        .collect();
    assert_eq!(extradata, configured);
    assert!(extradata.windows(5).any(|w| w == [0, 0, 0, 1, 0x67]));
    assert!(extradata.windows(5).any(|w| w == [0, 0, 0, 1, 0x68]));
    assert_eq!(core.report().frames, 0);
    assert!(session.receive_packet()?.is_none());

    session.send_frame(&nv12(0))?;
    let packets = drain(&mut session)?;
    assert_eq!(packets.len(), 1);
    assert!(packets[0].key);
    // Configuration is not repeated in-band.
    assert_eq!(&packets[0].data[..5], &[0, 0, 0, 1, 0x65]);
    assert_eq!(session.extradata(), &extradata[..]);
    session.close()?;
    Ok(())
}

#[test]
#[serial]
fn test_global_header_in_one_buffer() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        split_config: false,
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let config = SessionConfig::new(Codec::Hevc, 64, 32).with_global_header(true);
    let session = Session::open(core.clone(), config)?;
    let extradata = session.extradata();
    for header in [0x40, 0x42, 0x44] {
        assert!(extradata.windows(5).any(|w| w == [0, 0, 0, 1, header]));
    }
    let configured = core
        .report()
        .chunks
        .iter()
        .filter(|(flags, _)| flags.contains(BufferFlags::CODEC_CONFIG))
        .count();
    assert_eq!(configured, 1);
    session.close()?;
    Ok(())
}

#[test]
#[serial]
fn test_mpeg4_global_header_keeps_every_unit() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let config = SessionConfig::new(Codec::Mpeg4, 64, 32).with_global_header(true);
    let mut session = Session::open(core.clone(), config)?;
    assert!(!session.extradata().is_empty());

    session.send_frame(&nv12(0))?;
    let packets = drain(&mut session)?;
    assert_eq!(packets.len(), 1);
    assert_eq!(&packets[0].data[..4], &[0, 0, 1, 0xb6]);

    let configured: Vec<u8> = core
        .report()
        .chunks
        .iter()
        .filter(|(flags, _)| flags.contains(BufferFlags::CODEC_CONFIG))
        .flat_map(|(_, data)| data.iter().copied())
        .collect();
    assert_eq!(configured.len(), 20);
    assert_eq!(session.extradata(), &configured[..]);
    assert!(session
        .extradata()
        .windows(4)
        .any(|w| w == [0, 0, 1, 0x20]));
    session.close()?;
    Ok(())
}

#[test]
#[serial]
fn test_submit_paths() -> Result<(), Box<dyn StdError>> {
    let record = || LoopbackOptions {
        record_input: true,
        ..Default::default()
    };

    // Packed 64x32 frames already match the 16-aligned port layout.
    let core = LoopbackCore::new(record());
    let config = SessionConfig::new(Codec::Hevc, 64, 32).with_zero_copy(true);
    let mut session = Session::open(core.clone(), config)?;
    let input = nv12(0);
    assert_eq!(session.send_frame(&input)?, SubmitPath::ZeroCopy);
    drain(&mut session)?;
    assert_eq!(Arc::strong_count(&input), 1, "frame released on completion");
    session.close()?;
    let report = core.report();
    assert_eq!(report.zero_copy_inputs, 1);
    assert_eq!(report.inputs, vec![input.data().to_vec()]);

    // 60x30 is padded to 64x32 by the port, so the frame has to be copied.
    let input = frame(PixelFormat::Nv12, 60, 30, 0);
    let mut inputs = Vec::new();
    for (zero_copy, path) in [(true, SubmitPath::Scratch), (false, SubmitPath::InPlace)] {
        let core = LoopbackCore::new(record());
        let config = SessionConfig::new(Codec::Hevc, 60, 30).with_zero_copy(zero_copy);
        let mut session = Session::open(core.clone(), config)?;
        let layout = session.ports().map(|ports| ports.layout.clone());
        assert_eq!(layout, Some(ImageLayout::new(PixelFormat::Nv12, 64, 32)));
        assert_eq!(session.send_frame(&input)?, path);
        drain(&mut session)?;
        session.close()?;
        let report = core.report();
        assert_eq!(report.zero_copy_inputs, 0);
        inputs.push(report.inputs);
    }
    assert_eq!(inputs[0], inputs[1]);
    let copied = &inputs[0][0];
    assert_eq!(copied.len(), 64 * 48);
    assert_eq!(&copied[..60], input.row(0, 0));
    assert_eq!(&copied[64..124], input.row(0, 1));
    assert_eq!(&copied[64 * 32..64 * 32 + 60], input.row(1, 0));
    Ok(())
}

#[test]
#[serial]
fn test_planar_input() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let config = SessionConfig::new(Codec::Mpeg4, 64, 32).with_pixel_format(PixelFormat::Yuv420p);
    let mut session = Session::open(core, config)?;
    let ports = session.ports().cloned().ok_or("ports not negotiated")?;
    assert_eq!(ports.input.video.color_format, ColorFormat::Yuv420Planar);
    assert_eq!(ports.layout.size, 64 * 32 * 3 / 2);

    assert!(matches!(
        session.send_frame(&nv12(0)),
        Err(Error::InvalidFrame(_))
    ));
    session.send_frame(&frame(PixelFormat::Yuv420p, 64, 32, 0))?;
    let packets = drain(&mut session)?;
    assert_eq!(packets.len(), 1);
    assert!(packets[0].data.starts_with(&[0, 0, 1, 0xb0]));
    session.close()?;
    Ok(())
}

#[test]
#[serial]
fn test_unsupported_color_format() {
    let options = LoopbackOptions {
        color_formats: vec![ColorFormat::Yuv420SemiPlanar],
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let config = SessionConfig::new(Codec::Hevc, 64, 32).with_pixel_format(PixelFormat::Yuv420p);
    assert!(matches!(
        Session::open(core.clone(), config),
        Err(Error::PortNegotiationFailed(_))
    ));
    let report = core.report();
    assert_eq!(report.handles_acquired, 1);
    assert_eq!(report.handles_freed, 1);
    assert_eq!(report.deinitialized, 1);
    assert!(report.commands.is_empty());
}

#[test]
#[serial]
fn test_backpressure() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        input_buffers: 2,
        input_delay: Duration::from_millis(10),
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::H264, 64, 32))?;
    assert_eq!(session.stats(Direction::Input).total, 2);

    for pts in 0..6 {
        session.send_frame(&nv12(pts))?;
        let stats = session.stats(Direction::Input);
        assert!(stats.in_flight <= stats.total);
    }
    let packets = drain(&mut session)?;
    let pts: Vec<i64> = packets.iter().map(|packet| packet.pts).collect();
    assert_eq!(pts, vec![0, 1, 2, 3, 4, 5]);
    for (index, packet) in packets.iter().enumerate() {
        assert_eq!(parse_frame(&packet.data).map(|f| f.0), Some(index as u64));
    }

    assert_eq!(
        session.stats(Direction::Input),
        PoolStats {
            queued: 2,
            in_flight: 0,
            total: 2
        }
    );
    assert_eq!(session.stats(Direction::Output).in_flight, 4);
    session.close()?;
    Ok(())
}

#[test]
#[serial]
fn test_async_error_poisons_session() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        faults: Faults {
            error_after_frames: Some(2),
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;

    let mut failure = None;
    for pts in 0..16 {
        if let Err(err) = session.send_frame(&nv12(pts)) {
            failure = Some(err);
            break;
        }
    }
    let failure = failure.ok_or("session was never poisoned")?;
    assert!(matches!(
        failure,
        Error::SessionPoisoned(ErrorCode::HARDWARE)
    ));
    assert!(!failure.is_recoverable());
    assert_eq!(session.poisoned(), Some(ErrorCode::HARDWARE));
    assert!(matches!(
        session.flush(),
        Err(Error::SessionPoisoned(ErrorCode::HARDWARE))
    ));

    // Teardown still reclaims every buffer held by the failed component.
    let _ = session.close();
    let report = core.report();
    assert_eq!(report.frames, 2);
    assert_eq!(report.allocated, [4, 4]);
    assert_eq!(report.freed, [4, 4]);
    assert_eq!(report.handles_freed, 1);
    assert_eq!(report.states.last(), Some(&State::Loaded));
    Ok(())
}

#[test]
#[serial]
fn test_lifecycle() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;
    assert_eq!(session.state(), State::Executing);
    assert_eq!(session.component_name(), "OMX.loopback.video_encoder");
    assert_eq!(session.poisoned(), None);
    for pts in 0..3 {
        session.send_frame(&nv12(pts))?;
    }
    session.close()?;

    let report = core.report();
    assert_eq!(
        report.states,
        vec![State::Idle, State::Executing, State::Idle, State::Loaded]
    );
    assert_eq!(
        report.commands,
        vec![
            Command::StateSet(State::Idle),
            Command::StateSet(State::Executing),
            Command::StateSet(State::Idle),
            Command::StateSet(State::Loaded),
        ]
    );
    assert_eq!(report.allocated, [4, 4]);
    assert_eq!(report.freed, [4, 4]);
    assert_eq!(report.handles_acquired, 1);
    assert_eq!(report.handles_freed, 1);
    assert_eq!(report.initialized, 1);
    assert_eq!(report.deinitialized, 1);
    Ok(())
}

#[test]
#[serial]
fn test_drop_tears_down() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    {
        let mut session = Session::open(core.clone(), SessionConfig::new(Codec::H264, 64, 32))?;
        session.send_frame(&nv12(0))?;
    }
    let report = core.report();
    assert_eq!(report.freed, [4, 4]);
    assert_eq!(report.handles_freed, 1);
    assert_eq!(report.deinitialized, 1);
    Ok(())
}

#[test]
#[serial]
fn test_idle_refused() {
    let options = LoopbackOptions {
        faults: Faults {
            refuse_idle: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let result = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32));
    assert!(matches!(
        result,
        Err(Error::StateTransitionFailed {
            target: State::Idle,
            code: ErrorCode::INSUFFICIENT_RESOURCES,
        })
    ));
    let report = core.report();
    assert!(report.states.is_empty());
    assert_eq!(report.allocated, [4, 4]);
    assert_eq!(report.freed, [4, 4]);
    assert_eq!(report.handles_freed, 1);
    assert_eq!(report.deinitialized, 1);
}

#[test]
#[serial]
fn test_allocation_failure_releases_partial_pool() {
    let options = LoopbackOptions {
        faults: Faults {
            fail_allocate_after: Some(4),
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let result = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32));
    assert!(matches!(result, Err(Error::MemoryExhausted { bytes: 1024 })));
    let report = core.report();
    assert_eq!(report.allocated, [4, 0]);
    assert_eq!(report.freed, [4, 0]);
    assert_eq!(report.handles_freed, 1);
    assert_eq!(report.deinitialized, 1);
}

#[test]
#[serial]
fn test_component_unavailable() {
    let options = LoopbackOptions {
        roles: vec![Codec::Hevc.role().to_string()],
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let result = Session::open(core.clone(), SessionConfig::new(Codec::H264, 64, 32));
    assert!(matches!(result, Err(Error::ComponentNotFound { .. })));
    assert_eq!(core.report().deinitialized, 1);
    assert_eq!(core.report().handles_acquired, 0);

    let options = LoopbackOptions {
        faults: Faults {
            refuse_handle: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let result = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32));
    assert!(matches!(result, Err(Error::HandleAcquisitionFailed { .. })));
    assert_eq!(core.report().handles_freed, 0);
    assert_eq!(core.report().deinitialized, 1);

    let core = LoopbackCore::new(LoopbackOptions::default());
    let config = SessionConfig::new(Codec::Hevc, 64, 32).with_component("OMX.vendor.missing");
    let result = Session::open(core.clone(), config);
    assert!(matches!(result, Err(Error::HandleAcquisitionFailed { .. })));
    assert_eq!(core.report().deinitialized, 1);
}

#[test]
#[serial]
fn test_eos_once() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;
    for pts in 0..3 {
        session.send_frame(&nv12(pts))?;
    }
    assert!(session.send_eos()?);
    assert!(!session.send_eos()?);
    assert!(matches!(session.send_frame(&nv12(3)), Err(Error::Closed)));

    let packets = drain(&mut session)?;
    assert_eq!(packets.len(), 3);
    assert!(session.is_eos());
    assert!(session.flush()?.is_none());
    assert!(session.encode(None)?.is_none());
    session.close()?;
    assert_eq!(core.report().eos_emitted, 1);
    Ok(())
}

#[test]
#[serial]
fn test_gop_key_frames() -> Result<(), Box<dyn StdError>> {
    for codec in [Codec::Hevc, Codec::H264] {
        let core = LoopbackCore::new(LoopbackOptions::default());
        let config = SessionConfig::new(codec, 64, 32)
            .with_key_frame_interval(KeyFrameInterval::Frames(3));
        let mut session = Session::open(core.clone(), config)?;
        for pts in 0..7 {
            session.send_frame(&nv12(pts))?;
        }
        let keys: Vec<bool> = drain(&mut session)?.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![true, false, false, true, false, false, true]);
        session.close()?;

        let params = core.report().params;
        match codec {
            Codec::H264 => assert!(params.iter().any(|param| matches!(
                param,
                Param::Avc(avc) if avc.p_frames == 2 && avc.b_frames == 0
            ))),
            _ => assert!(params.iter().any(|param| matches!(
                param,
                Param::Hevc(hevc) if hevc.key_frame_interval == 3
            ))),
        }
    }
    Ok(())
}

#[test]
#[serial]
fn test_forced_key_frame() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let config =
        SessionConfig::new(Codec::Hevc, 64, 32).with_key_frame_interval(KeyFrameInterval::Frames(100));
    let mut session = Session::open(core.clone(), config)?;
    for pts in 0..5 {
        let mut input = VideoFrame::packed(PixelFormat::Nv12, 64, 32, vec![0; 64 * 48])?.with_pts(pts);
        if pts == 2 {
            input = input.with_picture_type(PictureType::Intra);
        }
        session.send_frame(&Arc::new(input))?;
    }
    let keys: Vec<bool> = drain(&mut session)?.iter().map(|p| p.key).collect();
    assert_eq!(keys, vec![true, false, true, false, false]);
    session.close()?;
    assert_eq!(core.report().refresh_requests, 1);
    Ok(())
}

#[test]
#[serial]
fn test_timestamps_rescaled() -> Result<(), Box<dyn StdError>> {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let config = SessionConfig::new(Codec::H264, 64, 32)
        .with_time_base(Rational::new(1, 90_000))
        .with_frame_rate(Rational::new(30_000, 1001));
    let mut session = Session::open(core, config)?;
    for pts in [0, 3003, 6006] {
        session.send_frame(&nv12(pts))?;
    }
    let pts: Vec<i64> = drain(&mut session)?.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, 3003, 6006]);
    session.close()?;
    Ok(())
}

#[test]
#[serial]
fn test_rejected_empty_is_recoverable() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        faults: Faults {
            reject_empty: Some(1),
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;

    session.send_frame(&nv12(0))?;
    let err = session.send_frame(&nv12(1)).err().ok_or("frame was accepted")?;
    assert!(matches!(
        err,
        Error::BufferExchangeFailed {
            op: "empty_this_buffer",
            direction: Direction::Input,
            ..
        }
    ));
    assert!(err.is_recoverable());
    session.send_frame(&nv12(2))?;

    let packets = drain(&mut session)?;
    let pts: Vec<i64> = packets.iter().map(|packet| packet.pts).collect();
    assert_eq!(pts, vec![0, 2]);
    assert_eq!(session.stats(Direction::Input).queued, 4);
    session.close()?;
    assert_eq!(core.report().freed, [4, 4]);
    Ok(())
}

#[test]
#[serial]
fn test_rejected_fill_is_recoverable() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        faults: Faults {
            // Four fills prime the port, the fifth is the first refill.
            reject_fill: Some(4),
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;
    let input = nv12(0);
    session.send_frame(&input)?;

    let err = session.flush().err().ok_or("refill was accepted")?;
    assert!(matches!(
        err,
        Error::BufferExchangeFailed {
            op: "fill_this_buffer",
            direction: Direction::Output,
            ..
        }
    ));
    assert!(err.is_recoverable());

    let packets = drain(&mut session)?;
    assert_eq!(packets.len(), 1);
    assert!(packets[0].key);
    assert_eq!(parse_frame(&packets[0].data), Some((0, 64 * 48, checksum(&input))));
    session.close()?;
    assert_eq!(core.report().freed, [4, 4]);
    Ok(())
}

#[test]
#[serial]
fn test_refused_refill_does_not_stall_polling() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        faults: Faults {
            // Three refills for the parameter sets, the fourth carries the picture.
            reject_fill: Some(7),
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut session = Session::open(core.clone(), SessionConfig::new(Codec::Hevc, 64, 32))?;
    let input = nv12(0);
    session.send_frame(&input)?;
    std::thread::sleep(Duration::from_millis(100));

    let err = session.receive_packet().err().ok_or("refill was accepted")?;
    assert!(matches!(
        err,
        Error::BufferExchangeFailed {
            op: "fill_this_buffer",
            ..
        }
    ));
    let packet = session.receive_packet()?.ok_or("packet was lost")?;
    assert_eq!(parse_frame(&packet.data), Some((0, 64 * 48, checksum(&input))));

    for _ in 0..3 {
        assert!(session.receive_packet()?.is_none());
    }
    assert!(drain(&mut session)?.is_empty());
    session.close()?;
    assert_eq!(core.report().freed, [4, 4]);
    Ok(())
}

#[test]
#[serial]
fn test_optional_parameters_rejected() -> Result<(), Box<dyn StdError>> {
    let options = LoopbackOptions {
        faults: Faults {
            reject_params: vec![ParamKind::Hevc, ParamKind::Bitrate],
            ..Default::default()
        },
        ..Default::default()
    };
    let core = LoopbackCore::new(options);
    let mut config = SessionConfig::new(Codec::Hevc, 64, 32);
    config.rotation = Rotation::Deg90;
    let mut session = Session::open(core.clone(), config)?;
    session.send_frame(&nv12(0))?;
    assert_eq!(drain(&mut session)?.len(), 1);
    session.close()?;

    let params = core.report().params;
    assert!(params.iter().all(|param| !matches!(
        param.kind(),
        ParamKind::Hevc | ParamKind::Bitrate | ParamKind::Rotation
    )));
    assert!(params
        .iter()
        .any(|param| param.kind() == ParamKind::PortDefinition));
    Ok(())
}

#[test]
#[serial]
fn test_invalid_config_rejected_before_loading() {
    let core = LoopbackCore::new(LoopbackOptions::default());
    let config = SessionConfig::new(Codec::Hevc, 0, 32);
    assert!(matches!(
        Session::open(core.clone(), config),
        Err(Error::InvalidConfig(_))
    ));
    assert_eq!(core.report().initialized, 0);
}
