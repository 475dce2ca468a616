//! Diagnostic CLI that drives `DuplexEngine` against the real default
//! audio devices. Not part of the mobile FFI surface; exists so a
//! developer can sanity-check a build against real hardware.
//!
//! Usage: `vocal_engine_demo record <reference.wav> <out.wav> [seconds]`

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use vocal_engine::config::ConfigManager;
use vocal_engine::engine::DuplexEngine;
use vocal_engine::{CapturePacket, HostCaptureSink};

struct LoggingSink;

impl HostCaptureSink for LoggingSink {
    fn on_captured(&self, packet: CapturePacket) {
        info!(
            "captured {} frames at outputFramePos={} session={}",
            packet.meta.num_frames, packet.meta.output_frame_pos, packet.meta.session_id
        );
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: {} record <reference.wav> <out.wav> [seconds]", args[0]);
        std::process::exit(1);
    }

    let reference_path = &args[2];
    let out_path = &args[3];
    let seconds: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(5);

    let manager = ConfigManager::with_config(vocal_engine::EngineConfig::default());
    let settings = &manager.get_config().audio;

    let engine = DuplexEngine::new();
    engine.set_capture_sink(Arc::new(LoggingSink));
    engine.prepare_for_record()?;
    engine.load_reference_path(reference_path)?;
    engine.start_duplex(settings.sample_rate, settings.channels)?;
    engine.open_transport_record_file(out_path)?;

    info!("recording {seconds}s against {reference_path}, writing {out_path}");
    std::thread::sleep(Duration::from_secs(seconds));

    engine.stop_transport_recording()?;
    engine.stop()?;

    let snapshot = engine.session_snapshot();
    info!(
        "done: {} bytes written, peak={:.3}, ringOverflows={}",
        engine.record_bytes(),
        engine.record_peak(),
        engine.ring_overflow_count()
    );
    info!("session snapshot: {snapshot:?}");

    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        error!("demo failed: {e}");
        std::process::exit(1);
    }
}
