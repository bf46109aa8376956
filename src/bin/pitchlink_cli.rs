// Deterministic replay harness for the pitchlink engine
//
// Feeds recorded sample logs through the real ingest path (payload pool,
// codec, stream buffer), runs the heuristic model over the result, applies
// optional corrections, and prints the exported training records. Used for
// model tuning without a phone or a wearable in the loop.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use pitchlink::annotation::{ActivityKind, ActivityLabel};
use pitchlink::codec::{encode_sample, SensorSample};
use pitchlink::context::IngestHandle;
use pitchlink::device::{DeviceId, ScriptedLink};
use pitchlink::{EngineConfig, EngineContext};

#[derive(Parser, Debug)]
#[command(
    name = "pitchlink_cli",
    about = "Replay harness for the pitchlink sensor-stream engine"
)]
struct Cli {
    /// Override path to an engine config JSON file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a JSONL sample log through the full pipeline
    Replay {
        /// JSONL file: one {device, sequence, timestamp_us, channels} per line
        #[arg(long)]
        input: PathBuf,
        /// Optional JSON array of {device, kind, start_us, end_us} corrections
        #[arg(long)]
        corrections: Option<PathBuf>,
        /// Override the configured confidence threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Write exported recordings to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the default engine configuration as JSON
    Defaults,
}

/// One recorded sample line in the replay log
#[derive(Debug, Deserialize)]
struct SampleSpec {
    device: String,
    sequence: u32,
    timestamp_us: u64,
    channels: Vec<f32>,
}

/// One human correction to apply after inference
#[derive(Debug, Deserialize)]
struct CorrectionSpec {
    device: String,
    kind: ActivityKind,
    start_us: u64,
    end_us: u64,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    model_version: String,
    counters: pitchlink::telemetry::CountersSnapshot,
    recordings: Vec<pitchlink::annotation::LabeledRecording>,
}

fn main() -> ExitCode {
    pitchlink::init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path),
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Replay {
            input,
            corrections,
            threshold,
            output,
        } => run_replay(config, input, corrections, threshold, output),
        Commands::Defaults => {
            println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_replay(
    mut config: EngineConfig,
    input: PathBuf,
    corrections: Option<PathBuf>,
    threshold: Option<f32>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    if let Some(threshold) = threshold {
        config.classifier.confidence_threshold = threshold;
    }

    let samples = load_samples(&input)?;
    if samples.is_empty() {
        bail!("no samples in {}", input.display());
    }
    let corrections = match corrections {
        Some(path) => load_corrections(&path)?,
        None => Vec::new(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let _guard = runtime.enter();

    let context = EngineContext::new(config, std::sync::Arc::new(ScriptedLink::new()));

    // Replay through the pooled ingest path, one worker per device
    let mut workers: HashMap<String, IngestHandle> = HashMap::new();
    let mut spans: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for spec in &samples {
        let device_id = DeviceId::new(spec.device.clone());
        let handle = workers
            .entry(spec.device.clone())
            .or_insert_with(|| context.spawn_ingest_worker(device_id.clone()));

        let frame = encode_sample(&SensorSample::new(
            device_id,
            spec.timestamp_us,
            spec.sequence,
            spec.channels.clone(),
        ));
        let mut slot = loop {
            match handle.free_consumer.pop() {
                Ok(slot) => break slot,
                // Pool drained; give the decode worker time to recycle
                Err(_) => std::thread::sleep(Duration::from_micros(200)),
            }
        };
        slot.extend_from_slice(&frame);
        handle
            .filled_producer
            .push(slot)
            .ok()
            .context("ingest worker stopped while replaying")?;

        let span = spans.entry(spec.device.clone()).or_insert((u64::MAX, 0));
        span.0 = span.0.min(spec.timestamp_us);
        span.1 = span.1.max(spec.timestamp_us);
    }
    for (_, handle) in workers.drain() {
        // Drains the filled queue, then exits
        handle.stop();
    }

    let mut recordings = Vec::new();
    for (device, (start_us, end_us)) in spans {
        let device_id = DeviceId::new(device.clone());
        let session_id = context
            .open_session(&device_id, start_us, end_us.saturating_add(1))
            .context("failed to open session")?;

        let window = context.session_window(session_id)?;
        match context.classify(&window) {
            Ok(labels) => {
                context.apply_inference_to_session(session_id, &labels)?;
            }
            Err(err) => {
                log::warn!("Skipping inference for {}: {}", device, err);
            }
        }

        for correction in corrections.iter().filter(|c| c.device == device) {
            context.correct_session(
                session_id,
                ActivityLabel::corrected(correction.kind, correction.start_us, correction.end_us),
            )?;
        }

        match context.finalize_session(session_id) {
            Ok(recording) => recordings.push(recording),
            Err(err) => log::warn!("Nothing exported for {}: {}", device, err),
        }
    }

    let report = ReplayReport {
        model_version: context.model_version(),
        counters: context.counters(),
        recordings,
    };
    let rendered = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => fs::write(&path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn load_samples(path: &PathBuf) -> Result<Vec<SampleSpec>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(number, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: bad sample line", path.display(), number + 1))
        })
        .collect()
}

fn load_corrections(path: &PathBuf) -> Result<Vec<CorrectionSpec>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse corrections {}", path.display()))
}
