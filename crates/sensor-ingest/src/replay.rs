//! Background reader that replays a text sensor log.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{info, warn};

use crate::{
    textlog::{excerpt, parse_line},
    types::SensorSample,
};

/// Counters reported when a replay reaches the end of its file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub samples: u64,
    pub skipped: u64,
}

/// Spawns a thread that parses `path` line by line and forwards samples over
/// the returned [`Receiver`], sleeping `pace` between records.
///
/// Malformed lines are skipped with a warning. The channel is small so the
/// reader backs off when ingestion falls behind; it disconnects at end of file.
pub fn spawn_log_replay(path: &Path, pace: Duration) -> Result<Receiver<SensorSample>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open sensor log {}", path.display()))?;
    let (tx, rx) = bounded(4);
    let label = path.display().to_string();

    thread::Builder::new()
        .name("sensor-log-replay".into())
        .spawn(move || {
            let summary = replay_lines(BufReader::new(file), pace, &tx);
            info!(
                samples = summary.samples,
                skipped = summary.skipped,
                "replay of {label} complete"
            );
        })
        .context("failed to spawn replay thread")?;

    Ok(rx)
}

/// Parse and forward every line of `reader`. Stops early if the receiver is gone.
pub fn replay_lines(reader: impl BufRead, pace: Duration, tx: &Sender<SensorSample>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stopping replay at line {}: {err}", index + 1);
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(sample)) => {
                if tx.send(sample).is_err() {
                    break;
                }
                summary.samples += 1;
                if !pace.is_zero() {
                    thread::sleep(pace);
                }
            }
            Ok(None) => {}
            Err(err) => {
                summary.skipped += 1;
                warn!("skipping line {} ({err}): {}", index + 1, excerpt(&line));
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::types::SensorKind;

    const LOG: &str = "\u{feff}# captured on the bench\n\
        US|2025-10-12 21:03:11|[87.3]\n\
        \n\
        US|2025-10-12 21:03:11|[oops]\n\
        US|2025-10-12 21:03:12|[86.0]\n";

    #[test]
    fn replays_valid_lines_and_counts_skips() {
        let (tx, rx) = unbounded();
        let summary = replay_lines(LOG.as_bytes(), Duration::ZERO, &tx);
        assert_eq!(
            summary,
            ReplaySummary {
                samples: 2,
                skipped: 2
            }
        );
        let samples: Vec<_> = rx.try_iter().collect();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.kind == SensorKind::Ultrasonic));
    }

    #[test]
    fn spawned_replay_disconnects_at_end_of_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        let rx = spawn_log_replay(file.path(), Duration::ZERO).unwrap();
        let samples: Vec<_> = rx.iter().collect();
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(spawn_log_replay(Path::new("/nonexistent/sensor.log"), Duration::ZERO).is_err());
    }
}
