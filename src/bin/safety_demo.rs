//! safety-demo - end-to-end synthetic run of the compliance pipeline
//!
//! Drives a synthetic camera through the full pipeline with a scripted detector
//! that cycles through compliant, partially equipped and explicitly
//! non-compliant scenes, then prints what the monitor saw.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use safety_monitor::detect::ScriptedBackend;
use safety_monitor::ui::{Ui, UiMode};
use safety_monitor::{
    BoundingBox, CaptureSettings, ChannelSubscriber, DetectionEngine, FilesystemCaptureStore,
    RawDetection, SafetyMonitor, SourceDescriptor, StreamConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How long to stream, in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second for the synthetic camera.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Run detection on every Nth frame.
    #[arg(long, default_value_t = 3)]
    detect_every: u64,
    /// Save violation snapshots into this directory.
    #[arg(long)]
    capture_dir: Option<PathBuf>,
    /// Write the final statistics as JSON to this path.
    #[arg(long)]
    stats_out: Option<PathBuf>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.detect_every == 0 {
        return Err(anyhow!("detect-every must be >= 1"));
    }
    let ui = Ui::for_stderr(args.ui);

    let mut monitor = {
        let _stage = ui.stage("Build pipeline");
        let engine = DetectionEngine::with_backend(Box::new(scripted_site()), 0.5);
        let capture = CaptureSettings {
            width: 640,
            height: 480,
            target_fps: args.fps,
            ..CaptureSettings::default()
        };
        let stream = StreamConfig {
            detect_every: args.detect_every,
            capture_cooldown: Duration::from_secs(1),
            ..StreamConfig::default()
        };
        let mut monitor = SafetyMonitor::new(engine, capture, stream);
        if let Some(dir) = &args.capture_dir {
            let store = FilesystemCaptureStore::open(dir, 75, 100)?;
            monitor.set_capture(Box::new(store))?;
        }
        monitor
    };

    let (subscriber, updates) = ChannelSubscriber::bounded("demo", 256);
    monitor.add_subscriber(Box::new(subscriber));

    {
        let stage = ui.stage("Connect synthetic camera");
        let descriptor: SourceDescriptor = "stub://demo".parse()?;
        if let Err(err) = monitor.start(&descriptor) {
            stage.fail(&err.to_string());
            return Err(err.into());
        }
    }

    let mut published = 0u64;
    let mut fresh = 0u64;
    let mut payload_bytes = 0usize;
    {
        let stage = ui.stage(&format!("Stream for {}s", args.seconds));
        let deadline = Duration::from_secs(args.seconds);
        while stage.elapsed() < deadline {
            for update in updates.try_iter() {
                published += 1;
                fresh += u64::from(update.fresh);
                payload_bytes += update.frame.len();
            }
            let stats = monitor.latest_stats();
            stage.update(format!(
                "{} frames, {} people, {} violation(s), {:.1} fps",
                stats.frames_processed,
                stats.people_count,
                stats.violations.len(),
                stats.stream_fps
            ));
            thread::sleep(Duration::from_millis(100));
        }
    }

    {
        let _stage = ui.stage("Stop monitor");
        monitor.stop();
        published += updates.try_iter().count() as u64;
    }

    let stats = monitor.latest_stats();
    let source = monitor.source_stats();
    println!("demo summary:");
    println!("  frames captured: {}", source.frames_captured);
    println!("  frames dropped: {}", source.frames_dropped);
    println!("  frames processed: {}", stats.frames_processed);
    println!("  updates received: {published} ({fresh} with fresh detections)");
    if published > 0 {
        println!("  mean JPEG size: {} bytes", payload_bytes as u64 / published);
    }
    println!("  detections run: {}", stats.detections_run);
    println!("  violations logged: {}", monitor.violation_total());
    println!("  captures saved: {}", stats.captures_saved);
    println!("recent violations:");
    for entry in monitor.recent_violations(10) {
        println!(
            "  {} {:<20} x{} {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.kind,
            entry.count,
            entry.description
        );
    }

    if let Some(path) = &args.stats_out {
        let json = serde_json::to_vec_pretty(&stats)?;
        fs::write(path, json).with_context(|| format!("writing stats to {}", path.display()))?;
        println!("stats written to {}", path.display());
    }
    Ok(())
}

/// Three workers across a 640x480 scene, cycling through four situations.
fn scripted_site() -> ScriptedBackend {
    let worker = |x: i32| BoundingBox::new(x, 140, x + 110, 440);
    let head = |x: i32| BoundingBox::new(x + 25, 140, x + 85, 190);
    let torso = |x: i32| BoundingBox::new(x + 5, 200, x + 105, 330);
    let face = |x: i32| BoundingBox::new(x + 35, 175, x + 75, 200);
    let people = [40, 260, 480];

    let mut all_equipped = Vec::new();
    for x in people {
        all_equipped.push(RawDetection::new("Person", 0.92, worker(x)));
        all_equipped.push(RawDetection::new("Hardhat", 0.88, head(x)));
        all_equipped.push(RawDetection::new("Safety Vest", 0.85, torso(x)));
        all_equipped.push(RawDetection::new("Mask", 0.81, face(x)));
    }

    // Two hardhats for three people: the ratio rule flags one missing.
    let mut short_on_hardhats = all_equipped.clone();
    short_on_hardhats.retain(|d| !(d.label == "Hardhat" && d.bbox == head(480)));

    // The model reports the missing vest explicitly.
    let mut explicit_negative = all_equipped.clone();
    explicit_negative.retain(|d| !(d.label == "Safety Vest" && d.bbox == torso(260)));
    explicit_negative.push(RawDetection::new("NO-Safety Vest", 0.77, torso(260)));

    // No masks seen at all, and one low-confidence hardhat below its threshold.
    let mut no_masks: Vec<RawDetection> = all_equipped
        .iter()
        .filter(|d| d.label != "Mask")
        .cloned()
        .collect();
    for d in no_masks.iter_mut().filter(|d| d.label == "Hardhat") {
        if d.bbox == head(40) {
            d.confidence = 0.55;
        }
    }

    ScriptedBackend::new(vec![
        all_equipped.clone(),
        all_equipped,
        short_on_hardhats,
        explicit_negative,
        no_masks,
    ])
}
