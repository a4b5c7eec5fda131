//! iqwell command line entry point.
//!
//! `capture` streams IQ from a device into a float32 stereo WAV (left = I,
//! right = Q); `probe` prints what a device can do as JSON.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use iqwell_core::{capabilities, IqSource, RadioDevice, ReplayRadio, SimConfig, SimulatedRadio, SourceConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "iqwell")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture IQ samples to a WAV file
    Capture(CaptureArgs),
    /// Print device capabilities as JSON
    Probe(ProbeArgs),
}

#[derive(clap::Args, Debug)]
struct CaptureArgs {
    /// Device to stream from: "sim" or a path to a CS16LE/WAV recording
    #[arg(short, long, default_value = "sim")]
    device: String,

    /// Replay recordings in a loop instead of stopping at EOF
    #[arg(long)]
    loop_input: bool,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "500000")]
    rate: f64,

    /// Center frequency in Hz
    #[arg(short, long, default_value = "100000000")]
    frequency: f64,

    /// Aggregate gain target in dB, spread across the device's stages
    #[arg(short, long)]
    gain: Option<f64>,

    /// Samples to capture
    #[arg(short = 'n', long, default_value = "500000")]
    samples: u64,

    /// Capture duration in seconds, converted at the device's actual rate
    #[arg(long, conflicts_with = "samples")]
    seconds: Option<f64>,

    /// Samples per pull
    #[arg(long, default_value = "65536")]
    chunk: usize,

    /// Output WAV path
    #[arg(short, long, default_value = "capture.wav")]
    out: PathBuf,
}

#[derive(clap::Args, Debug)]
struct ProbeArgs {
    /// Device to inspect: "sim" or a path to a recording
    #[arg(short, long, default_value = "sim")]
    device: String,
}

fn build_device(spec: &str, loop_input: bool) -> anyhow::Result<Arc<dyn RadioDevice>> {
    if spec == "sim" {
        Ok(Arc::new(SimulatedRadio::new(SimConfig::default())))
    } else {
        let replay = ReplayRadio::open(spec, loop_input)
            .with_context(|| format!("opening recording {spec}"))?;
        Ok(Arc::new(replay))
    }
}

fn capture(args: CaptureArgs) -> anyhow::Result<()> {
    let device = build_device(&args.device, args.loop_input)?;
    let rate = device.set_sample_rate(args.rate)?;
    let tuned = device.set_center_frequency(args.frequency)?;
    info!(device = %device.label(), rate, tuned, "device configured");

    let total = match args.seconds {
        Some(s) if s > 0.0 => (s * rate) as u64,
        Some(s) => anyhow::bail!("--seconds must be positive, got {s}"),
        None => args.samples,
    };

    let mut source = IqSource::start(Arc::clone(&device), SourceConfig::default())?;
    if let Some(target) = args.gain {
        let applied = source.set_aggregate_gain(target)?;
        info!(target, applied, "aggregate gain applied");
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args.out, spec)
        .with_context(|| format!("creating {}", args.out.display()))?;

    // Enter on stdin ends the capture early; EOF (piped input) does not.
    let (stop_tx, stop_rx) = bounded::<()>(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
            let _ = stop_tx.try_send(());
        }
    });

    println!("Capturing {total} samples to {} (Enter stops early)", args.out.display());

    let mut written: u64 = 0;
    while written < total {
        if stop_rx.try_recv().is_ok() {
            info!(written, "capture stopped by user");
            break;
        }
        let take = usize::try_from((total - written).min(args.chunk as u64))
            .context("chunk size does not fit usize")?;
        match source.pull(take)? {
            Some(batch) => {
                for sample in &batch {
                    writer.write_sample(sample.re)?;
                    writer.write_sample(sample.im)?;
                }
                written += batch.len() as u64;
            }
            None => {
                info!(written, "end of stream");
                break;
            }
        }
    }

    writer.finalize().context("finalizing WAV")?;
    source.shutdown()?;

    let snap = source.diagnostics();
    println!(
        "Captured {written} samples to {} ({} blocks in, {} overflows)",
        args.out.display(),
        snap.blocks_in,
        snap.overflows
    );
    if snap.overflows > 0 {
        warn!(
            overflows = snap.overflows,
            "consumer fell behind; oldest data was dropped"
        );
    }
    Ok(())
}

fn probe(args: ProbeArgs) -> anyhow::Result<()> {
    let device = build_device(&args.device, false)?;
    let caps = capabilities(device.as_ref());
    println!("{}", serde_json::to_string_pretty(&caps)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iqwell=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Capture(args) => capture(args),
        Command::Probe(args) => probe(args),
    }
}
