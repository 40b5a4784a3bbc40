// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use omx_encoder::{
    frame::{ImageLayout, PictureType, VideoFrame},
    loopback::{LoopbackCore, LoopbackOptions},
    Packet, Session, SessionConfig,
};
use serde_json::json;
use std::{
    error::Error,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, info, info_span, warn};
use tracing_log::LogTracer;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, Layer};

#[derive(Default)]
struct Summary {
    frames: u64,
    packets: u64,
    key_frames: u64,
    bytes: u64,
    extradata: usize,
}

impl Summary {
    fn write(
        &mut self,
        out: &mut impl Write,
        session: &Session,
        packet: &Packet,
    ) -> io::Result<()> {
        if self.packets == 0 {
            let extradata = session.extradata();
            out.write_all(extradata)?;
            self.extradata = extradata.len();
        }
        debug!(pts = packet.pts, len = packet.data.len(), key = packet.key, "packet");
        out.write_all(&packet.data)?;
        self.packets += 1;
        self.bytes += packet.data.len() as u64;
        if packet.key {
            self.key_frames += 1;
        }
        Ok(())
    }
}

fn init_logging(args: &Args) -> Result<Option<tracy_client::Client>, Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stdlog = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(level);

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_filter(level)),
            Err(err) => {
                eprintln!("journald unavailable: {}", err);
                None
            }
        }
    } else {
        None
    };

    let client = args.tracy.then(tracy_client::Client::start);
    let tracy = client
        .as_ref()
        .map(|_| tracing_tracy::TracyLayer::default());

    let subscriber = tracing_subscriber::registry()
        .with(stdlog)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    LogTracer::init()?;
    Ok(client)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let _tracy = init_logging(&args)?;

    let options = LoopbackOptions {
        output_buffers: args.output_buffers,
        output_buffer_size: args.max_chunk,
        max_chunk: args.max_chunk,
        record_output: false,
        ..Default::default()
    };
    let core = LoopbackCore::new(options);

    let input = File::open(&args.input)?;
    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(File::create(&args.output)?);
    let limit = args.frames;
    let force_key = args.force_key;
    let config = SessionConfig::from(args.clone());
    let (format, width, height) = (config.pixel_format, config.width, config.height);
    let frame_size = ImageLayout::new(format, width as usize, height as usize).size;

    let start = Instant::now();
    let mut session = Session::open(core.clone(), config)?;
    info!(component = session.component_name(), "session open");

    let mut summary = Summary::default();
    let mut zero_copy = 0u64;
    loop {
        if limit.is_some_and(|limit| summary.frames >= limit) {
            break;
        }
        let mut data = vec![0; frame_size];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }

        let index = summary.frames;
        let picture_type = if force_key > 0 && index > 0 && index % force_key as u64 == 0 {
            PictureType::Intra
        } else {
            PictureType::Unknown
        };
        let frame = VideoFrame::packed(format, width, height, data)?
            .with_pts(index as i64)
            .with_picture_type(picture_type);

        let span = info_span!("frame", index);
        let _guard = span.enter();
        let path = session.send_frame(&Arc::new(frame))?;
        if path == omx_encoder::SubmitPath::ZeroCopy {
            zero_copy += 1;
        }
        summary.frames += 1;
        while let Some(packet) = session.receive_packet()? {
            summary.write(&mut writer, &session, &packet)?;
        }
    }

    while let Some(packet) = session.flush()? {
        summary.write(&mut writer, &session, &packet)?;
    }
    if summary.packets == 0 {
        writer.write_all(session.extradata())?;
        summary.extradata = session.extradata().len();
    }
    writer.flush()?;

    let elapsed = start.elapsed();
    if let Err(err) = session.close() {
        warn!(%err, "session did not close cleanly");
    }

    let report = core.report();
    let fps = if elapsed.as_secs_f64() > 0.0 {
        summary.frames as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let output = json!({
        "frames": summary.frames,
        "packets": summary.packets,
        "key_frames": summary.key_frames,
        "bytes": summary.bytes,
        "extradata": summary.extradata,
        "zero_copy_frames": zero_copy,
        "refresh_requests": report.refresh_requests,
        "states": report.states.iter().map(|state| state.to_string()).collect::<Vec<_>>(),
        "elapsed_ms": elapsed.as_millis() as u64,
        "fps": fps,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
