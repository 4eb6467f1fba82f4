use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::error;

use crate::assist::telemetry;

pub const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const WATCHDOG_STALE_THRESHOLD: Duration = Duration::from_secs(5);

/// Last time the ingestion loop made progress, in epoch milliseconds.
pub struct IngestHealth {
    last_beat: AtomicU64,
}

impl IngestHealth {
    pub fn new() -> Self {
        Self {
            last_beat: AtomicU64::new(current_millis()),
        }
    }

    pub fn beat(&self) {
        self.last_beat.store(current_millis(), Ordering::Relaxed);
    }

    /// How long the heartbeat has been silent at `now_ms`.
    pub fn silence(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_beat.load(Ordering::Relaxed)))
    }
}

impl Default for IngestHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnect request raised by the watchdog and consumed by ingestion.
pub struct WatchdogState {
    reconnect_requested: AtomicBool,
    alarms: AtomicU64,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self {
            reconnect_requested: AtomicBool::new(false),
            alarms: AtomicU64::new(0),
        }
    }

    pub fn arm(&self) {
        self.alarms.fetch_add(1, Ordering::Relaxed);
        self.reconnect_requested.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once per armed request.
    pub fn take_reconnect_request(&self) -> bool {
        self.reconnect_requested.swap(false, Ordering::SeqCst)
    }

    pub fn alarms(&self) -> u64 {
        self.alarms.load(Ordering::Relaxed)
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WatchdogTiming {
    pub poll_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for WatchdogTiming {
    fn default() -> Self {
        Self {
            poll_interval: WATCHDOG_POLL_INTERVAL,
            stale_threshold: WATCHDOG_STALE_THRESHOLD,
        }
    }
}

/// Poll the ingestion heartbeat until shutdown.
///
/// A silent heartbeat raises an alarm at most once per stale threshold; the
/// process keeps running.
pub fn spawn_watchdog(
    health: Arc<IngestHealth>,
    state: Arc<WatchdogState>,
    shutdown: Arc<AtomicBool>,
    timing: WatchdogTiming,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("assist-watchdog", move || {
        let mut last_alarm_ms: Option<u64> = None;
        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(timing.poll_interval);
            let now = current_millis();
            let silence = health.silence(now);
            if silence <= timing.stale_threshold {
                last_alarm_ms = None;
                continue;
            }
            let due = last_alarm_ms.is_none_or(|at| {
                Duration::from_millis(now.saturating_sub(at)) > timing.stale_threshold
            });
            if due {
                error!(
                    silent_ms = silence.as_millis() as u64,
                    "ingestion heartbeat stale; requesting transport reconnect"
                );
                metrics::counter!("assist_watchdog_alarms_total").increment(1);
                state.arm();
                last_alarm_ms = Some(now);
            }
        }
    })
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
