use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::config::ConfigError;

/// Proximity classification of the fused distance, ordered by increasing proximity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    #[default]
    None,
    Far,
    Mid,
    Near,
    Close,
}

impl Zone {
    pub fn label(self) -> &'static str {
        match self {
            Zone::None => "none",
            Zone::Far => "far",
            Zone::Mid => "mid",
            Zone::Near => "near",
            Zone::Close => "close",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Zone {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Zone::None),
            "far" => Ok(Zone::Far),
            "mid" => Ok(Zone::Mid),
            "near" => Ok(Zone::Near),
            "close" => Ok(Zone::Close),
            other => Err(ConfigError::UnknownZone(other.into())),
        }
    }
}

/// Lower bounds (meters, exclusive) of each zone band.
///
/// A fused distance above `none` is [`Zone::None`], above `far` is
/// [`Zone::Far`], and so on; anything at or below `near` is [`Zone::Close`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoneThresholds {
    pub none: f32,
    pub far: f32,
    pub mid: f32,
    pub near: f32,
}

impl ZoneThresholds {
    /// `2.0 / 1.5 / 1.0 / 0.35` m, the default table.
    pub const fn standard() -> Self {
        Self {
            none: 2.0,
            far: 1.5,
            mid: 1.0,
            near: 0.35,
        }
    }

    /// `1.5 / 1.0 / 0.75 / 0.2` m, a tighter table for short-range use.
    pub const fn compact() -> Self {
        Self {
            none: 1.5,
            far: 1.0,
            mid: 0.75,
            near: 0.2,
        }
    }

    pub fn classify(&self, distance_m: f32) -> Zone {
        if distance_m > self.none {
            Zone::None
        } else if distance_m > self.far {
            Zone::Far
        } else if distance_m > self.mid {
            Zone::Mid
        } else if distance_m > self.near {
            Zone::Near
        } else {
            Zone::Close
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bands = [self.none, self.far, self.mid, self.near];
        if bands.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(ConfigError::Thresholds(
                "thresholds must be positive and finite".into(),
            ));
        }
        if bands.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(ConfigError::Thresholds(format!(
                "thresholds must be strictly decreasing, got {self}"
            )));
        }
        Ok(())
    }
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Display for ZoneThresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.none, self.far, self.mid, self.near)
    }
}

/// Accepts `standard`, `compact`, or four comma-separated meters.
impl FromStr for ZoneThresholds {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "standard" => return Ok(Self::standard()),
            "compact" => return Ok(Self::compact()),
            _ => {}
        }
        let values = s
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|_| ConfigError::Thresholds(format!("invalid number {v:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let &[none, far, mid, near] = values.as_slice() else {
            return Err(ConfigError::Thresholds(format!(
                "expected 4 thresholds, got {}",
                values.len()
            )));
        };
        let thresholds = Self {
            none,
            far,
            mid,
            near,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }
}
