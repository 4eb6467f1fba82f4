use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use sensor_ingest::{FrameDecoder, format_line};
use tracing::info;

use crate::assist::{self, AssistConfig, ReplayArgs, RunArgs, TelemetryOptions, telemetry};

/// Proximity cues and scene captions from a depth/ultrasonic sensor head.
#[derive(Debug, Parser)]
#[command(name = "vision-assist", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest live frames from a serial port or TCP bridge.
    Run(RunArgs),
    /// Feed a recorded text log through the full pipeline.
    Replay(ReplayArgs),
    /// Convert a raw binary capture into text-log lines on stdout.
    Decode(DecodeArgs),
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// File holding raw bytes as read from the serial port.
    #[arg(value_name = "BINARY")]
    pub input: PathBuf,
}

pub fn handle(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => assist::run(AssistConfig::try_from(args)?),
        Command::Replay(args) => assist::run(AssistConfig::try_from(args)?),
        Command::Decode(args) => decode(&args),
    }
}

fn decode(args: &DecodeArgs) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&TelemetryOptions::default());
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let mut decoder = FrameDecoder::new();
    decoder.extend(&bytes);
    let frames = decoder.decode_all();
    let timestamp = Local::now().naive_local();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for frame in frames {
        for sample in frame.into_samples(timestamp) {
            writeln!(out, "{}", format_line(&sample))?;
        }
    }
    out.flush()?;

    let stats = decoder.stats();
    info!(
        frames = stats.frames,
        checksum_failures = stats.checksum_failures,
        bytes_discarded = stats.bytes_discarded,
        trailing = decoder.buffered(),
        "decoded {}",
        args.input.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["vision-assist", "decode", "capture.bin"]).unwrap();
        assert!(matches!(cli.command, Command::Decode(DecodeArgs { ref input }) if input == &PathBuf::from("capture.bin")));

        let cli = Cli::try_parse_from(["vision-assist", "replay", "walk.log", "--exit-on-eof"]).unwrap();
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert!(args.exit_on_eof);
        assert_eq!(args.pace_ms, 100);

        assert!(Cli::try_parse_from(["vision-assist"]).is_err());
    }

    #[test]
    fn decode_reads_raw_captures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let frame = sensor_ingest::Frame {
            depth_mm: [1500; sensor_ingest::GRID_CELLS],
            ultrasonic_cm: 120.0,
        };
        let mut bytes = vec![0x00, 0x13];
        bytes.extend(frame.encode());
        fs::write(&path, bytes).unwrap();

        decode(&DecodeArgs { input: path }).unwrap();
        assert!(decode(&DecodeArgs { input: dir.path().join("missing.bin") }).is_err());
    }
}
