//! Orchestrator wiring the ingestion, manual, vision and audio workers to the
//! event bus.
//!
//! Startup spawns every worker before returning. Shutdown runs in dependency
//! order: the polling producers observe the cancellation flag first, then each
//! queue receives its sentinel so consumers drain what is already queued.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, Once, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use fusion_core::{CooldownGate, FusionConfig, FusionEngine, FusionSnapshot};
use sensor_ingest::{FrameLink, SystemConnector, spawn_log_replay};
use tracing::{debug, info, warn};

use crate::assist::{
    AssistConfig, SourceConfig,
    audio::spawn_audio_consumer,
    bus::{EventBus, Queue},
    collaborators::Collaborators,
    ingestion::{IngestSource, IngestionWorker, SharedSnapshot},
    manual::{ManualInput, StdinTrigger, spawn_manual_worker},
    server::{PreviewServer, spawn_preview_server},
    telemetry::{self, join_worker},
    vision::spawn_vision_consumer,
    watchdog::{IngestHealth, WatchdogState, WatchdogTiming, spawn_watchdog},
};

const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Running set of workers for one pipeline.
pub struct Orchestrator {
    bus: EventBus,
    shutdown: Arc<AtomicBool>,
    snapshot: SharedSnapshot,
    watchdog: Arc<WatchdogState>,
    ingestion: Option<thread::JoinHandle<()>>,
    manual: Option<thread::JoinHandle<()>>,
    vision: Option<thread::JoinHandle<()>>,
    audio: Option<thread::JoinHandle<()>>,
    watchdog_handle: Option<thread::JoinHandle<()>>,
    preview: Option<PreviewServer>,
}

impl Orchestrator {
    /// Spawn every worker. `shutdown` is the shared cancellation flag; setting
    /// it from outside (Ctrl+C, end of replay) lets [`Orchestrator::wait`] return.
    pub fn start(
        fusion: FusionConfig,
        source: IngestSource,
        collaborators: Collaborators,
        manual: Option<Box<dyn ManualInput>>,
        preview_addr: Option<SocketAddr>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let bus = EventBus::new();
        let gate = CooldownGate::new(fusion.cooldown);
        let cooldown = fusion.cooldown;
        let health = Arc::new(IngestHealth::new());
        let watchdog = Arc::new(WatchdogState::new());
        let snapshot: SharedSnapshot = Arc::new(Mutex::new(None));
        let Collaborators {
            capture,
            captioner,
            speech,
            tone,
        } = collaborators;

        let mut orchestrator = Self {
            bus,
            shutdown: shutdown.clone(),
            snapshot: snapshot.clone(),
            watchdog: watchdog.clone(),
            ingestion: None,
            manual: None,
            vision: None,
            audio: None,
            watchdog_handle: None,
            preview: None,
        };

        // Consumers first so nothing published during startup waits unread.
        orchestrator.audio = Some(
            spawn_audio_consumer(orchestrator.bus.events(), tone, speech)
                .context("failed to spawn audio consumer")?,
        );
        orchestrator.vision = Some(
            spawn_vision_consumer(
                orchestrator.bus.vision_requests(),
                orchestrator.bus.publisher(),
                capture,
                captioner,
                cooldown,
            )
            .context("failed to spawn vision consumer")?,
        );

        if let Some(input) = manual {
            orchestrator.manual = Some(
                spawn_manual_worker(input, gate.clone(), orchestrator.bus.publisher(), shutdown.clone())
                    .context("failed to spawn manual trigger worker")?,
            );
        }

        orchestrator.watchdog_handle = Some(
            spawn_watchdog(
                health.clone(),
                watchdog.clone(),
                shutdown.clone(),
                WatchdogTiming::default(),
            )
            .context("failed to spawn watchdog")?,
        );

        let worker = IngestionWorker::new(
            FusionEngine::new(fusion, gate),
            source,
            orchestrator.bus.publisher(),
            snapshot.clone(),
            health,
            watchdog,
            shutdown,
        );
        orchestrator.ingestion = Some(worker.spawn().context("failed to spawn ingestion worker")?);

        if let Some(addr) = preview_addr {
            orchestrator.preview =
                Some(spawn_preview_server(snapshot, addr).context("failed to start preview server")?);
        }

        info!("pipeline started");
        Ok(orchestrator)
    }

    /// Latest best-effort fusion snapshot.
    pub fn snapshot(&self) -> Option<FusionSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn watchdog_alarms(&self) -> u64 {
        self.watchdog.alarms()
    }

    /// Block until the cancellation flag is raised.
    pub fn wait(&self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(WAIT_INTERVAL);
        }
    }

    /// Stop every worker, draining queued vision requests, captions and speech.
    pub fn shutdown(mut self) {
        info!("stopping pipeline");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.ingestion.take() {
            join_worker("ingestion", handle);
        }
        if let Some(handle) = self.manual.take() {
            join_worker("manual trigger", handle);
        }

        // Captions finishing during the vision drain still reach the audio queue.
        if let Some(handle) = self.vision.take() {
            self.bus.shutdown(Queue::Vision, 1);
            join_worker("vision", handle);
        }
        if let Some(handle) = self.audio.take() {
            self.bus.shutdown(Queue::Events, 1);
            join_worker("audio", handle);
        }

        if let Some(handle) = self.watchdog_handle.take() {
            join_worker("watchdog", handle);
        }
        if let Some(preview) = self.preview.take() {
            preview.stop();
        }
        debug!("pipeline stopped");
    }
}

/// Run the assistive pipeline until Ctrl+C (or the end of a replay with
/// `--exit-on-eof`).
pub fn run(config: AssistConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    });

    let (source, source_label) = match &config.source {
        SourceConfig::Serial(serial) => {
            let connector = SystemConnector::new(serial.spec.clone(), serial.read_timeout);
            (
                IngestSource::Link(FrameLink::new(connector, serial.link.clone())),
                serial.spec.to_string(),
            )
        }
        SourceConfig::Replay(replay) => {
            let rx = spawn_log_replay(&replay.path, replay.pace)
                .with_context(|| format!("failed to open sensor log {}", replay.path.display()))?;
            (
                IngestSource::Samples {
                    rx,
                    exit_on_eof: replay.exit_on_eof,
                },
                replay.path.display().to_string(),
            )
        }
    };

    let pipeline_span = tracing::info_span!(
        "assist.pipeline",
        source = %source_label,
        vision_zone = %config.fusion.vision_zone,
        region = config.fusion.depth_region.label(),
        cooldown_secs = config.fusion.cooldown.as_secs()
    );
    let _pipeline_span_guard = pipeline_span.enter();
    info!(thresholds = %config.fusion.thresholds, "zone thresholds");

    let collaborators = Collaborators::from_args(&config.collaborators, &std::env::temp_dir());
    let manual: Option<Box<dyn ManualInput>> = match StdinTrigger::spawn() {
        Ok(trigger) => Some(Box::new(trigger)),
        Err(err) => {
            warn!("manual trigger unavailable: {err}");
            None
        }
    };

    let orchestrator = Orchestrator::start(
        config.fusion,
        source,
        collaborators,
        manual,
        config.preview_addr,
        shutdown,
    )?;
    info!("press Enter to describe the scene, Ctrl+C to stop");
    orchestrator.wait();
    orchestrator.shutdown();
    Ok(())
}
