use std::time::Instant;

use chrono::NaiveDateTime;
use sensor_ingest::{SensorKind, SensorSample};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    conditioning::{ConditionedGrid, DepthConditioner, Grid, region_mean},
    config::FusionConfig,
    cooldown::CooldownGate,
    events::{BeepLevel, Event, VisionSource},
    window::RollingWindow,
    zone::Zone,
};

/// Everything the engine carries between ingest calls.
///
/// Owned by a single [`FusionEngine`]; other threads only ever see a
/// [`FusionSnapshot`] copy.
#[derive(Clone, Debug)]
pub struct ConditionedState {
    conditioner: DepthConditioner,
    last_grid: Option<ConditionedGrid>,
    depth_window: RollingWindow,
    ultrasonic_window: RollingWindow,
    last_zone: Zone,
    last_fused_m: Option<f32>,
    last_ultrasonic_cm: Option<f32>,
    last_timestamp: Option<NaiveDateTime>,
    last_vision_trigger: Option<Instant>,
}

impl ConditionedState {
    fn new(config: &FusionConfig) -> Self {
        Self {
            conditioner: DepthConditioner::new(config.decay, config.max_range_m),
            last_grid: None,
            depth_window: RollingWindow::new(config.window),
            ultrasonic_window: RollingWindow::new(config.window),
            last_zone: Zone::None,
            last_fused_m: None,
            last_ultrasonic_cm: None,
            last_timestamp: None,
            last_vision_trigger: None,
        }
    }

    pub fn smoothed_depth_m(&self) -> Option<f32> {
        self.depth_window.mean()
    }

    pub fn smoothed_ultrasonic_cm(&self) -> Option<f32> {
        self.ultrasonic_window.mean()
    }
}

/// Best-effort, read-only copy of the engine state for display consumers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FusionSnapshot {
    /// Conditioned grid in meters, row-major; empty until the first depth frame.
    pub grid: Vec<f32>,
    /// Contrast-stretched grid in `[0, 1]`.
    pub presentation: Vec<f32>,
    pub fused_distance_m: Option<f32>,
    pub smoothed_depth_m: Option<f32>,
    pub smoothed_ultrasonic_cm: Option<f32>,
    pub last_ultrasonic_cm: Option<f32>,
    pub zone: Zone,
    pub timestamp: Option<NaiveDateTime>,
}

/// Turns sensor samples into beep, mismatch and vision-trigger events.
pub struct FusionEngine {
    config: FusionConfig,
    state: ConditionedState,
    gate: CooldownGate,
}

impl FusionEngine {
    /// `gate` may be a clone shared with the manual trigger.
    pub fn new(config: FusionConfig, gate: CooldownGate) -> Self {
        let state = ConditionedState::new(&config);
        Self {
            config,
            state,
            gate,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn state(&self) -> &ConditionedState {
        &self.state
    }

    pub fn last_zone(&self) -> Zone {
        self.state.last_zone
    }

    pub fn last_fused_m(&self) -> Option<f32> {
        self.state.last_fused_m
    }

    pub fn ingest(&mut self, sample: &SensorSample) -> Vec<Event> {
        self.ingest_at(sample, Instant::now())
    }

    /// Fold one sample into the state. Invalid samples are logged and dropped.
    pub fn ingest_at(&mut self, sample: &SensorSample, now: Instant) -> Vec<Event> {
        if let Err(err) = sample.validate() {
            warn!("dropping sample: {err}");
            return Vec::new();
        }
        self.state.last_timestamp = Some(sample.timestamp);

        match sample.kind {
            SensorKind::DepthGrid => self.ingest_depth(&sample.values),
            SensorKind::Ultrasonic => {
                let centimeters = sample.values[0];
                if centimeters <= 0.0 {
                    warn!(centimeters, "dropping non-positive ultrasonic reading");
                    return Vec::new();
                }
                self.state.last_ultrasonic_cm = Some(centimeters);
                self.state.ultrasonic_window.push(centimeters);
            }
        }

        match (
            self.state.smoothed_depth_m(),
            self.state.smoothed_ultrasonic_cm(),
        ) {
            (Some(depth_m), Some(ultrasonic_cm)) => self.fuse(depth_m, ultrasonic_cm, now),
            _ => Vec::new(),
        }
    }

    fn ingest_depth(&mut self, values: &[f32]) {
        let Ok(grid) = Grid::try_from(values) else {
            return;
        };
        self.state.last_grid = Some(self.state.conditioner.condition(&grid));
        match region_mean(values, self.config.depth_region) {
            Some(mean) => self.state.depth_window.push(mean),
            None => debug!(
                region = self.config.depth_region.label(),
                "depth frame has no valid cells"
            ),
        }
    }

    /// Fuse smoothed readings and emit mismatch, zone-edge and vision events,
    /// in that order.
    pub fn fuse(&mut self, depth_m: f32, ultrasonic_cm: f32, now: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        let ultrasonic_m = ultrasonic_cm / 100.0;
        let fused = depth_m.min(ultrasonic_m);
        self.state.last_fused_m = Some(fused);

        if (depth_m - ultrasonic_m).abs() > self.config.mismatch_ratio * fused {
            debug!(depth_m, ultrasonic_m, "sensor mismatch");
            events.push(Event::Beep(BeepLevel::Mismatch));
        }

        let zone = self.config.thresholds.classify(fused);
        if zone == self.state.last_zone {
            return events;
        }
        info!(from = %self.state.last_zone, to = %zone, fused_m = fused, "zone change");
        self.state.last_zone = zone;
        if let Some(level) = BeepLevel::from_zone(zone) {
            events.push(Event::Beep(level));
        }

        if zone == self.config.vision_zone {
            match self.gate.try_fire(now) {
                Ok(()) => {
                    info!(zone = %zone, "vision trigger fired");
                    self.state.last_vision_trigger = Some(now);
                    events.push(Event::VisionRequest(VisionSource::Sensor));
                }
                Err(remaining) => {
                    info!(
                        remaining_ms = remaining.as_millis() as u64,
                        "vision trigger on cooldown"
                    );
                }
            }
        }
        events
    }

    pub fn last_vision_trigger(&self) -> Option<Instant> {
        self.state.last_vision_trigger
    }

    pub fn snapshot(&self) -> FusionSnapshot {
        let (grid, presentation) = match &self.state.last_grid {
            Some(conditioned) => (
                conditioned.grid.to_vec(),
                conditioned.presentation.to_vec(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        FusionSnapshot {
            grid,
            presentation,
            fused_distance_m: self.state.last_fused_m,
            smoothed_depth_m: self.state.smoothed_depth_m(),
            smoothed_ultrasonic_cm: self.state.smoothed_ultrasonic_cm(),
            last_ultrasonic_cm: self.state.last_ultrasonic_cm,
            zone: self.state.last_zone,
            timestamp: self.state.last_timestamp,
        }
    }
}
