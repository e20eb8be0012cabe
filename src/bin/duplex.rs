//! AIFF Duplex command-line tool
//!
//! Plays an AIFF file while recording the input device into a new one.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aiff_duplex::{
    audio::{list_devices, CpalTransport, StreamConfig},
    codec::{open_container, repair, ChunkTag, FormatDescriptor},
    config::AppConfig,
    session::{self, normalize_path, SessionOptions, SessionReport},
};

/// Play an AIFF file and record a new one on the same audio clock
#[derive(Parser, Debug)]
#[command(name = "aiff-duplex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play INPUT and record to OUTPUT until interrupted
    Run {
        input: PathBuf,
        output: PathBuf,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Stop as soon as INPUT has been played
        #[arg(long)]
        stop_when_played: bool,

        /// Frames per callback period
        #[arg(long)]
        frames: Option<u32>,

        #[arg(long)]
        input_device: Option<String>,

        #[arg(long)]
        output_device: Option<String>,

        /// Print the session report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List audio devices
    Devices,
    /// Show the format and chunk layout of an AIFF file
    Inspect {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Patch the length fields of a recording that was never finalized
    Repair { file: PathBuf },
}

impl Cli {
    fn default_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Serialize)]
struct ChunkSummary {
    tag: ChunkTag,
    offset: u64,
    length: u32,
}

#[derive(Serialize)]
struct InspectReport {
    path: PathBuf,
    format: FormatDescriptor,
    samples_available: u64,
    chunks: Vec<ChunkSummary>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.default_filter().into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            input,
            output,
            duration,
            stop_when_played,
            frames,
            input_device,
            output_device,
            json,
        } => {
            if duration.is_some() {
                config.session.max_duration_secs = duration;
            }
            if stop_when_played {
                config.session.stop_when_played = true;
            }
            if let Some(frames) = frames {
                config.stream.frames_per_buffer = frames;
            }
            if input_device.is_some() {
                config.stream.input_device = input_device;
            }
            if output_device.is_some() {
                config.stream.output_device = output_device;
            }
            config.validate()?;

            let report = run_session(input, output, config).await?;
            print_report(&report, json)?;
            Ok(if report.is_fault() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Devices => {
            print_devices();
            Ok(ExitCode::SUCCESS)
        }
        Command::Inspect { file, json } => {
            inspect(normalize_path(file), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Repair { file } => {
            let file = normalize_path(file);
            let done = repair(&file).with_context(|| format!("repairing {}", file.display()))?;
            println!(
                "{}: {} samples, FORM {} bytes, SSND {} bytes",
                file.display(),
                done.total_samples,
                done.outer_length,
                done.data_chunk_length
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_session(input: PathBuf, output: PathBuf, config: AppConfig) -> Result<SessionReport> {
    let options = SessionOptions::from_config(input, output, &config)?;
    let transport = CpalTransport::from_settings(&config.stream);

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, stopping");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                // Keep the sender alive; dropping it would end the session
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    println!("Playing and recording. Press Ctrl-C to stop.");
    let report = tokio::task::spawn_blocking(move || {
        session::run(&transport, &options, &shutdown_rx)
    })
    .await
    .context("session thread panicked")??;
    Ok(report)
}

fn print_report(report: &SessionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("\n=== Session ===");
    println!("  Stopped:  {:?} after {:.1}s", report.stop_reason, report.duration_secs());
    println!("  Played:   {} samples", report.samples_played);
    println!(
        "  Recorded: {} samples to {}",
        report.finalized.total_samples,
        report.output.display()
    );
    if report.dropped_frames > 0 {
        println!("  Dropped:  {} capture blocks", report.dropped_frames);
    }
    if let Some(fault) = &report.fault {
        println!("  Fault:    {}", fault);
    }
    Ok(())
}

fn print_devices() {
    let defaults = StreamConfig::default();
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let mut markers = String::new();
        if device.is_default_input {
            markers.push_str(" [DEFAULT IN]");
        }
        if device.is_default_output {
            markers.push_str(" [DEFAULT OUT]");
        }
        let rate_ok = device.sample_rates.contains(&defaults.sample_rate);
        println!("  {} ({}){}:", device.name, device_type, markers);
        println!(
            "    Sample rates: {:?}{}",
            device.sample_rates,
            if rate_ok { "" } else { " (no 44100 Hz)" }
        );
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn inspect(path: PathBuf, json: bool) -> Result<()> {
    let container =
        open_container(&path).with_context(|| format!("reading {}", path.display()))?;
    let report = InspectReport {
        format: container.format,
        samples_available: container.source.len_samples(),
        chunks: container
            .chunks
            .iter()
            .map(|chunk| ChunkSummary {
                tag: chunk.tag(),
                offset: chunk.body.start,
                length: chunk.header.length,
            })
            .collect(),
        path,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let format = &report.format;
    println!("{}", report.path.display());
    println!("  Channels:        {}", format.channels);
    println!("  Sample count:    {}", format.sample_count);
    println!("  Bits per sample: {}", format.bits_per_sample);
    match format.sample_rate_hz() {
        Some(hz) => println!("  Sample rate:     {} Hz", hz),
        None => println!("  Sample rate:     invalid"),
    }
    println!("  Samples in SSND: {}", report.samples_available);
    for chunk in &report.chunks {
        println!("  {} at {} ({} bytes)", chunk.tag, chunk.offset, chunk.length);
    }
    if format.declared_samples() > report.samples_available {
        println!("  warning: COMM declares more samples than SSND holds");
    }
    Ok(())
}
