//! Command-line surface and its translation into validated runtime settings.
//!
//! Every flag also reads a `VA_*` environment variable. Conversion through
//! `TryFrom` is the only place raw strings become typed configuration, so an
//! invalid value aborts startup before any worker is spawned.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;
use fusion_core::{DepthRegion, FusionConfig, Zone, ZoneThresholds};
use sensor_ingest::{LinkOptions, TransportSpec};

/// Tunables shared by `run` and `replay`.
#[derive(Clone, Debug, Args)]
pub struct FusionArgs {
    /// Weight of the previous grid in the temporal filter, in [0, 1).
    #[arg(long, env = "VA_DECAY", default_value_t = 0.7)]
    pub decay: f32,
    /// Depth readings are clipped to this range, in meters.
    #[arg(long = "max-range", env = "VA_MAX_RANGE", default_value_t = 4.0)]
    pub max_range: f32,
    /// Zone bounds as four decreasing meters, e.g. `2.0,1.5,1.0,0.35`.
    #[arg(long, env = "VA_THRESHOLDS", conflicts_with = "threshold_table")]
    pub thresholds: Option<String>,
    /// Named zone table: `standard` or `compact`.
    #[arg(long = "threshold-table", env = "VA_THRESHOLD_TABLE")]
    pub threshold_table: Option<String>,
    /// Depth cells feeding fusion: `center` (4×4 block) or `full`.
    #[arg(long = "depth-region", env = "VA_DEPTH_REGION", default_value = "center")]
    pub depth_region: String,
    /// Zone whose entry requests a capture: `close` or `near`.
    #[arg(long = "vision-zone", env = "VA_VISION_ZONE", default_value = "close")]
    pub vision_zone: String,
    /// Minimum seconds between vision triggers.
    #[arg(long = "cooldown-secs", env = "VA_COOLDOWN_SECS", default_value_t = 10)]
    pub cooldown_secs: u64,
    /// Relative sensor disagreement that raises a mismatch beep.
    #[arg(long = "mismatch-ratio", env = "VA_MISMATCH_RATIO", default_value_t = 0.3)]
    pub mismatch_ratio: f32,
    /// Readings averaged by each rolling window.
    #[arg(long, env = "VA_WINDOW", default_value_t = 5)]
    pub window: usize,
}

/// Shell templates for the external collaborators.
#[derive(Clone, Debug, Default, Args)]
pub struct CollaboratorArgs {
    /// Writes one image to `{output}`.
    #[arg(long = "capture-cmd", env = "VA_CAPTURE_CMD")]
    pub capture_cmd: Option<String>,
    /// Prints a caption for `{image}` on stdout.
    #[arg(long = "caption-cmd", env = "VA_CAPTION_CMD")]
    pub caption_cmd: Option<String>,
    /// Speaks the text given on stdin, returning when playback ends.
    #[arg(long = "speech-cmd", env = "VA_SPEECH_CMD")]
    pub speech_cmd: Option<String>,
    /// Plays `{freq}` Hz for `{duration}` seconds.
    #[arg(long = "tone-cmd", env = "VA_TONE_CMD")]
    pub tone_cmd: Option<String>,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryArgs {
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", env = "VA_CHROME_TRACE", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Address of the snapshot/metrics preview server.
    #[arg(long = "preview-addr", env = "VA_PREVIEW_ADDR", default_value = "127.0.0.1:8080")]
    pub preview_addr: String,
    /// Do not start the preview server.
    #[arg(long = "no-preview", action = clap::ArgAction::SetTrue)]
    pub no_preview: bool,
}

/// Arguments of the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Serial device, or `tcp://host:port` for a network bridge.
    #[arg(long, env = "VA_PORT", default_value = "/dev/ttyUSB0")]
    pub port: String,
    #[arg(long, env = "VA_BAUD", default_value_t = 115_200)]
    pub baud: u32,
    /// Transport read timeout; bounds how quickly shutdown is observed.
    #[arg(long = "read-timeout-ms", env = "VA_READ_TIMEOUT_MS", default_value_t = 100)]
    pub read_timeout_ms: u64,
    #[arg(long = "reconnect-delay-ms", env = "VA_RECONNECT_DELAY_MS", default_value_t = 3000)]
    pub reconnect_delay_ms: u64,
    /// Frames closer together than this are dropped; 0 disables the cap.
    #[arg(long = "min-frame-interval-ms", env = "VA_MIN_FRAME_INTERVAL_MS", default_value_t = 50)]
    pub min_frame_interval_ms: u64,
    #[command(flatten)]
    pub fusion: FusionArgs,
    #[command(flatten)]
    pub collaborators: CollaboratorArgs,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
}

/// Arguments of the `replay` subcommand.
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Text log with one `TYPE|TIMESTAMP|[values]` record per line.
    #[arg(value_name = "LOG")]
    pub log: PathBuf,
    /// Delay between replayed records.
    #[arg(long = "pace-ms", env = "VA_PACE_MS", default_value_t = 100)]
    pub pace_ms: u64,
    /// Stop the pipeline once the log is exhausted.
    #[arg(long = "exit-on-eof", action = clap::ArgAction::SetTrue)]
    pub exit_on_eof: bool,
    #[command(flatten)]
    pub fusion: FusionArgs,
    #[command(flatten)]
    pub collaborators: CollaboratorArgs,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
}

#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    pub chrome_trace_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct SerialSource {
    pub spec: TransportSpec,
    pub read_timeout: Duration,
    pub link: LinkOptions,
}

#[derive(Clone, Debug)]
pub struct ReplaySource {
    pub path: PathBuf,
    pub pace: Duration,
    pub exit_on_eof: bool,
}

/// Where the ingestion worker gets its samples.
#[derive(Clone, Debug)]
pub enum SourceConfig {
    Serial(SerialSource),
    Replay(ReplaySource),
}

/// Fully validated settings for one pipeline run.
#[derive(Clone, Debug)]
pub struct AssistConfig {
    pub source: SourceConfig,
    pub fusion: FusionConfig,
    pub collaborators: CollaboratorArgs,
    pub telemetry: TelemetryOptions,
    pub preview_addr: Option<SocketAddr>,
}

impl TryFrom<FusionArgs> for FusionConfig {
    type Error = anyhow::Error;

    fn try_from(args: FusionArgs) -> Result<Self> {
        let thresholds: ZoneThresholds = args
            .thresholds
            .or(args.threshold_table)
            .as_deref()
            .unwrap_or("standard")
            .parse()?;
        let depth_region: DepthRegion = args.depth_region.parse()?;
        let vision_zone: Zone = args.vision_zone.parse()?;
        if !matches!(vision_zone, Zone::Close | Zone::Near) {
            bail!("--vision-zone must be `close` or `near`, got `{vision_zone}`");
        }

        let config = FusionConfig {
            decay: args.decay,
            max_range_m: args.max_range,
            thresholds,
            depth_region,
            vision_zone,
            cooldown: Duration::from_secs(args.cooldown_secs),
            mismatch_ratio: args.mismatch_ratio,
            window: args.window,
        };
        config.validate()?;
        Ok(config)
    }
}

fn preview_addr(args: &TelemetryArgs) -> Result<Option<SocketAddr>> {
    if args.no_preview {
        return Ok(None);
    }
    let addr = args
        .preview_addr
        .parse()
        .with_context(|| format!("invalid --preview-addr {:?}", args.preview_addr))?;
    Ok(Some(addr))
}

impl TryFrom<RunArgs> for AssistConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self> {
        if args.port.trim().is_empty() {
            bail!("--port must not be empty");
        }
        if args.baud == 0 {
            bail!("--baud must be positive");
        }
        if args.read_timeout_ms == 0 {
            bail!("--read-timeout-ms must be at least 1");
        }

        let spec = TransportSpec::from_address(args.port.trim(), args.baud);
        let link = LinkOptions {
            reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
            min_frame_interval: (args.min_frame_interval_ms > 0)
                .then(|| Duration::from_millis(args.min_frame_interval_ms)),
        };
        let preview_addr = preview_addr(&args.telemetry)?;

        Ok(Self {
            source: SourceConfig::Serial(SerialSource {
                spec,
                read_timeout: Duration::from_millis(args.read_timeout_ms),
                link,
            }),
            fusion: args.fusion.try_into()?,
            collaborators: args.collaborators,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.telemetry.chrome_trace,
            },
            preview_addr,
        })
    }
}

impl TryFrom<ReplayArgs> for AssistConfig {
    type Error = anyhow::Error;

    fn try_from(args: ReplayArgs) -> Result<Self> {
        if !args.log.is_file() {
            bail!("sensor log {} does not exist", args.log.display());
        }
        let preview_addr = preview_addr(&args.telemetry)?;

        Ok(Self {
            source: SourceConfig::Replay(ReplaySource {
                path: args.log,
                pace: Duration::from_millis(args.pace_ms),
                exit_on_eof: args.exit_on_eof,
            }),
            fusion: args.fusion.try_into()?,
            collaborators: args.collaborators,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.telemetry.chrome_trace,
            },
            preview_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct RunHarness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> Result<AssistConfig> {
        let argv = std::iter::once("vision-assist").chain(args.iter().copied());
        let harness = RunHarness::try_parse_from(argv)?;
        AssistConfig::try_from(harness.run)
    }

    #[test]
    fn defaults_describe_a_local_serial_run() {
        let config = parse(&[]).unwrap();
        let SourceConfig::Serial(serial) = &config.source else {
            panic!("expected serial source");
        };
        assert_eq!(
            serial.spec,
            TransportSpec::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 115_200
            }
        );
        assert_eq!(serial.link.reconnect_delay, Duration::from_secs(3));
        assert_eq!(serial.link.min_frame_interval, Some(Duration::from_millis(50)));
        assert_eq!(config.fusion, FusionConfig::default());
        assert_eq!(config.preview_addr, Some("127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn fusion_flags_are_applied() {
        let config = parse(&[
            "--port",
            "tcp://10.0.0.2:9000",
            "--threshold-table",
            "compact",
            "--depth-region",
            "full",
            "--vision-zone",
            "near",
            "--cooldown-secs",
            "15",
            "--min-frame-interval-ms",
            "0",
            "--no-preview",
        ])
        .unwrap();
        assert_eq!(config.fusion.thresholds, ZoneThresholds::compact());
        assert_eq!(config.fusion.depth_region, DepthRegion::Full);
        assert_eq!(config.fusion.vision_zone, Zone::Near);
        assert_eq!(config.fusion.cooldown, Duration::from_secs(15));
        assert_eq!(config.preview_addr, None);
        let SourceConfig::Serial(serial) = &config.source else {
            panic!("expected serial source");
        };
        assert_eq!(
            serial.spec,
            TransportSpec::Tcp {
                addr: "10.0.0.2:9000".into()
            }
        );
        assert_eq!(serial.link.min_frame_interval, None);
    }

    #[test]
    fn invalid_values_abort_startup() {
        for args in [
            &["--thresholds", "1.0,1.5,0.5,0.2"][..],
            &["--decay", "1.2"],
            &["--window", "0"],
            &["--cooldown-secs", "0"],
            &["--vision-zone", "far"],
            &["--depth-region", "edge"],
            &["--preview-addr", "not-an-addr"],
            &["--baud", "0"],
        ] {
            assert!(parse(args).is_err(), "{args:?} should be rejected");
        }
    }

    #[test]
    fn thresholds_and_table_are_exclusive() {
        assert!(parse(&["--thresholds", "2,1.5,1,0.3", "--threshold-table", "compact"]).is_err());
    }
}
