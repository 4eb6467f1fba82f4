//! Ingestion worker: owns the sample source and the fusion engine.

use std::{
    io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use fusion_core::{BeepLevel, Event, FusionEngine, FusionSnapshot, VisionSource};
use sensor_ingest::{DecodeStats, FrameLink, SensorSample, SystemConnector};
use tracing::{debug, info, warn};

use crate::assist::{
    bus::EventPublisher,
    telemetry,
    watchdog::{IngestHealth, WatchdogState},
};

/// Best-effort copy of the engine state, read by the preview server.
pub type SharedSnapshot = Arc<Mutex<Option<FusionSnapshot>>>;

const SAMPLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub enum IngestSource {
    /// Live binary frames from a serial or TCP transport.
    Link(FrameLink<SystemConnector>),
    /// Already-parsed samples, e.g. from a replayed log.
    Samples {
        rx: Receiver<SensorSample>,
        /// Set the shutdown flag once the channel disconnects.
        exit_on_eof: bool,
    },
}

impl IngestSource {
    fn label(&self) -> &'static str {
        match self {
            IngestSource::Link(_) => "link",
            IngestSource::Samples { .. } => "samples",
        }
    }
}

pub struct IngestionWorker {
    engine: FusionEngine,
    source: IngestSource,
    publisher: EventPublisher,
    snapshot: SharedSnapshot,
    health: Arc<IngestHealth>,
    watchdog: Arc<WatchdogState>,
    shutdown: Arc<AtomicBool>,
    reported: DecodeStats,
    exhausted: bool,
}

impl IngestionWorker {
    pub fn new(
        engine: FusionEngine,
        source: IngestSource,
        publisher: EventPublisher,
        snapshot: SharedSnapshot,
        health: Arc<IngestHealth>,
        watchdog: Arc<WatchdogState>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            source,
            publisher,
            snapshot,
            health,
            watchdog,
            shutdown,
            reported: DecodeStats::default(),
            exhausted: false,
        }
    }

    pub fn spawn(self) -> io::Result<thread::JoinHandle<()>> {
        telemetry::spawn_thread("assist-ingest", move || self.run())
    }

    /// Loop until the shutdown flag is set. Errors from the source are
    /// handled inside; nothing here ends the loop on its own except
    /// `exit_on_eof`, which raises the shutdown flag itself.
    pub fn run(mut self) {
        let _span = tracing::info_span!("assist.ingest", source = self.source.label()).entered();
        while !self.shutdown.load(Ordering::Relaxed) {
            if self.watchdog.take_reconnect_request() {
                self.force_reconnect();
            }
            self.step();
        }
        info!("ingestion stopped");
    }

    /// Honour a watchdog request. Only a live stream counts as a reconnect;
    /// a link that is already backing off is left alone.
    fn force_reconnect(&mut self) -> bool {
        let IngestSource::Link(link) = &mut self.source else {
            return false;
        };
        if !link.force_reconnect() {
            debug!("watchdog reconnect request while already reconnecting");
            return false;
        }
        warn!("watchdog requested transport reconnect");
        metrics::counter!("assist_transport_reconnects_total").increment(1);
        true
    }

    fn step(&mut self) {
        match &mut self.source {
            IngestSource::Link(link) => {
                let poll = link.poll(&self.shutdown);
                if poll.transport_failed {
                    metrics::counter!("assist_transport_reconnects_total").increment(1);
                }
                if poll.bytes_read > 0 {
                    self.health.beat();
                }
                if poll.rate_limited > 0 {
                    metrics::counter!("assist_frames_rate_limited_total")
                        .increment(poll.rate_limited as u64);
                }
                let stats = link.decode_stats();
                self.report_decode_stats(stats);

                if poll.frames.is_empty() {
                    return;
                }
                let timestamp = Local::now().naive_local();
                for frame in poll.frames {
                    for sample in frame.into_samples(timestamp) {
                        self.ingest(&sample);
                    }
                }
            }
            IngestSource::Samples { rx, exit_on_eof } => {
                if self.exhausted {
                    // Nothing more will arrive; stay alive until shutdown.
                    self.health.beat();
                    thread::sleep(SAMPLE_POLL_INTERVAL);
                    return;
                }
                let exit_on_eof = *exit_on_eof;
                let received = rx.recv_timeout(SAMPLE_POLL_INTERVAL);
                match received {
                    Ok(sample) => {
                        self.health.beat();
                        self.ingest(&sample);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("sample source exhausted");
                        self.exhausted = true;
                        if exit_on_eof {
                            self.shutdown.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
        }
    }

    /// Mirror the decoder's cumulative counters into metrics.
    fn report_decode_stats(&mut self, stats: DecodeStats) {
        let last = self.reported;
        metrics::counter!("assist_frames_decoded_total")
            .increment(stats.frames.saturating_sub(last.frames));
        metrics::counter!("assist_checksum_failures_total")
            .increment(stats.checksum_failures.saturating_sub(last.checksum_failures));
        metrics::counter!("assist_bytes_discarded_total")
            .increment(stats.bytes_discarded.saturating_sub(last.bytes_discarded));
        self.reported = stats;
    }

    fn ingest(&mut self, sample: &SensorSample) {
        let previous_zone = self.engine.last_zone();
        let events = self.engine.ingest(sample);
        let zone = self.engine.last_zone();

        if zone != previous_zone {
            metrics::counter!("assist_zone_changes_total", "zone" => zone.label()).increment(1);
            let fired = events.contains(&Event::VisionRequest(VisionSource::Sensor));
            if zone == self.engine.config().vision_zone && !fired {
                metrics::counter!("assist_vision_suppressed_total").increment(1);
            }
        }
        if let Some(fused) = self.engine.last_fused_m() {
            metrics::gauge!("assist_fused_distance_meters").set(f64::from(fused));
        }

        for event in events {
            match &event {
                Event::Beep(BeepLevel::Mismatch) => {
                    metrics::counter!("assist_mismatch_total").increment(1);
                }
                Event::VisionRequest(source) => {
                    metrics::counter!("assist_vision_requests_total", "source" => source.label())
                        .increment(1);
                }
                _ => {}
            }
            if !self.publisher.publish(event) {
                warn!("event bus closed; dropping event");
            }
        }

        let snapshot = self.engine.snapshot();
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use crossbeam_channel::unbounded;
    use fusion_core::{CooldownGate, FusionConfig, Zone};
    use sensor_ingest::{GRID_CELLS, LinkOptions, TransportSpec};

    use super::*;
    use crate::assist::bus::EventBus;

    fn worker_with(source: IngestSource, bus: &EventBus) -> IngestionWorker {
        let config = FusionConfig::default();
        let gate = CooldownGate::new(config.cooldown);
        IngestionWorker::new(
            FusionEngine::new(config, gate),
            source,
            bus.publisher(),
            Arc::new(Mutex::new(None)),
            Arc::new(IngestHealth::new()),
            Arc::new(WatchdogState::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn tcp_link(addr: String) -> IngestSource {
        let connector = SystemConnector::new(TransportSpec::Tcp { addr }, Duration::from_millis(20));
        IngestSource::Link(FrameLink::new(
            connector,
            LinkOptions {
                reconnect_delay: Duration::from_millis(1),
                min_frame_interval: None,
            },
        ))
    }

    #[test]
    fn watchdog_reconnect_only_counts_live_streams() {
        let bus = EventBus::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut worker = worker_with(tcp_link(addr), &bus);

        // Not connected yet: nothing to close.
        assert!(!worker.force_reconnect());

        worker.step();
        let (_peer, _) = listener.accept().unwrap();
        assert!(worker.force_reconnect());
        assert!(!worker.force_reconnect());

        let mut replay = worker_with(
            IngestSource::Samples {
                rx: unbounded().1,
                exit_on_eof: false,
            },
            &bus,
        );
        assert!(!replay.force_reconnect());
    }

    fn ts() -> chrono::NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    #[test]
    fn replayed_samples_reach_the_bus_and_snapshot() {
        let bus = EventBus::new();
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let snapshot: SharedSnapshot = Arc::new(Mutex::new(None));
        let config = FusionConfig::default();
        let gate = CooldownGate::new(config.cooldown);
        let worker = IngestionWorker::new(
            FusionEngine::new(config, gate),
            IngestSource::Samples {
                rx,
                exit_on_eof: true,
            },
            bus.publisher(),
            snapshot.clone(),
            Arc::new(IngestHealth::new()),
            Arc::new(WatchdogState::new()),
            shutdown.clone(),
        );

        tx.send(SensorSample::depth_grid(ts(), vec![0.3; GRID_CELLS]))
            .unwrap();
        tx.send(SensorSample::ultrasonic(ts(), 30.0)).unwrap();
        drop(tx);
        worker.spawn().unwrap().join().unwrap();

        assert!(shutdown.load(Ordering::SeqCst));
        assert_eq!(
            bus.events().try_iter().collect::<Vec<_>>(),
            vec![Event::Beep(BeepLevel::Close)]
        );
        assert_eq!(
            bus.vision_requests().try_iter().collect::<Vec<_>>(),
            vec![Event::VisionRequest(VisionSource::Sensor)]
        );
        let latest = snapshot.lock().unwrap().clone().unwrap();
        assert_eq!(latest.zone, Zone::Close);
    }
}
