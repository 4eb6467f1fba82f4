//! Conditioning and fusion of depth-grid and ultrasonic samples into
//! edge-triggered proximity events.

pub mod conditioning;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod events;
pub mod window;
pub mod zone;

pub use conditioning::{ConditionedGrid, DepthConditioner, Grid};
pub use config::{ConfigError, DepthRegion, FusionConfig};
pub use cooldown::CooldownGate;
pub use engine::{ConditionedState, FusionEngine, FusionSnapshot};
pub use events::{BeepLevel, Event, VisionSource};
pub use sensor_ingest::SampleError;
pub use window::RollingWindow;
pub use zone::{Zone, ZoneThresholds};
