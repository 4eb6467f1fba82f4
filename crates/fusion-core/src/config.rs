//! Tunables for conditioning, fusion and triggering.
//!
//! Everything that differed between firmware generations (threshold table,
//! depth region, vision-trigger zone) is a field here rather than a constant,
//! so the choice is visible to tests and to the CLI.

use std::{str::FromStr, time::Duration};

use thiserror::Error;

use crate::zone::{Zone, ZoneThresholds};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid zone thresholds: {0}")]
    Thresholds(String),
    #[error("unknown zone {0:?}")]
    UnknownZone(String),
    #[error("unknown depth region {0:?} (expected `center` or `full`)")]
    UnknownRegion(String),
    #[error("{name} out of range: {detail}")]
    OutOfRange { name: &'static str, detail: String },
}

/// Which depth cells feed the fusion input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepthRegion {
    /// 4×4 block at rows 3–6, cols 3–6 (indices 27–30, 35–38, 43–46, 51–54).
    #[default]
    Center,
    /// Every cell of the grid.
    Full,
}

impl DepthRegion {
    pub fn label(self) -> &'static str {
        match self {
            DepthRegion::Center => "center",
            DepthRegion::Full => "full",
        }
    }
}

impl FromStr for DepthRegion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "center" | "centre" => Ok(DepthRegion::Center),
            "full" => Ok(DepthRegion::Full),
            other => Err(ConfigError::UnknownRegion(other.into())),
        }
    }
}

pub const DEFAULT_DECAY: f32 = 0.7;
pub const DEFAULT_MAX_RANGE_M: f32 = 4.0;
pub const DEFAULT_WINDOW: usize = 5;
pub const DEFAULT_MISMATCH_RATIO: f32 = 0.3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
const MAX_COOLDOWN: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq)]
pub struct FusionConfig {
    /// Weight of the previous filtered grid in the temporal filter, `[0, 1)`.
    pub decay: f32,
    /// Depth readings are clipped to this range (meters).
    pub max_range_m: f32,
    pub thresholds: ZoneThresholds,
    pub depth_region: DepthRegion,
    /// Zone whose entry requests a vision capture.
    pub vision_zone: Zone,
    /// Minimum time between vision triggers.
    pub cooldown: Duration,
    /// Relative disagreement between sensors that raises a mismatch beep.
    pub mismatch_ratio: f32,
    /// Capacity of the depth and ultrasonic rolling windows.
    pub window: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            decay: DEFAULT_DECAY,
            max_range_m: DEFAULT_MAX_RANGE_M,
            thresholds: ZoneThresholds::standard(),
            depth_region: DepthRegion::Center,
            vision_zone: Zone::Close,
            cooldown: DEFAULT_COOLDOWN,
            mismatch_ratio: DEFAULT_MISMATCH_RATIO,
            window: DEFAULT_WINDOW,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if !(0.0..1.0).contains(&self.decay) {
            return Err(ConfigError::OutOfRange {
                name: "decay",
                detail: format!("{} not in [0, 1)", self.decay),
            });
        }
        if !self.max_range_m.is_finite() || self.max_range_m <= 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "max range",
                detail: format!("{} m must be positive", self.max_range_m),
            });
        }
        if self.vision_zone == Zone::None {
            return Err(ConfigError::OutOfRange {
                name: "vision zone",
                detail: "must be a proximity zone, not `none`".into(),
            });
        }
        if self.cooldown < Duration::from_secs(1) || self.cooldown > MAX_COOLDOWN {
            return Err(ConfigError::OutOfRange {
                name: "cooldown",
                detail: format!("{:?} not in [1s, 1h]", self.cooldown),
            });
        }
        if !self.mismatch_ratio.is_finite() || self.mismatch_ratio <= 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "mismatch ratio",
                detail: format!("{} must be positive", self.mismatch_ratio),
            });
        }
        if self.window == 0 {
            return Err(ConfigError::OutOfRange {
                name: "window",
                detail: "must hold at least one reading".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(FusionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases: Vec<Box<dyn Fn(&mut FusionConfig)>> = vec![
            Box::new(|c| c.decay = 1.0),
            Box::new(|c| c.decay = -0.1),
            Box::new(|c| c.max_range_m = 0.0),
            Box::new(|c| c.vision_zone = Zone::None),
            Box::new(|c| c.cooldown = Duration::from_millis(10)),
            Box::new(|c| c.mismatch_ratio = 0.0),
            Box::new(|c| c.window = 0),
            Box::new(|c| c.thresholds.near = 5.0),
        ];
        for mutate in cases {
            let mut config = FusionConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn parses_depth_region() {
        assert_eq!("Center".parse(), Ok(DepthRegion::Center));
        assert_eq!("full".parse(), Ok(DepthRegion::Full));
        assert!("corner".parse::<DepthRegion>().is_err());
    }
}
