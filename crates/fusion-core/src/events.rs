use std::fmt;

use serde::Serialize;

use crate::zone::Zone;

/// Tone requested from the audio consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BeepLevel {
    Far,
    Mid,
    Near,
    Close,
    /// The two sensors disagree beyond the mismatch ratio.
    Mismatch,
}

impl BeepLevel {
    /// `None` has no tone.
    pub fn from_zone(zone: Zone) -> Option<Self> {
        match zone {
            Zone::None => None,
            Zone::Far => Some(BeepLevel::Far),
            Zone::Mid => Some(BeepLevel::Mid),
            Zone::Near => Some(BeepLevel::Near),
            Zone::Close => Some(BeepLevel::Close),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BeepLevel::Far => "far",
            BeepLevel::Mid => "mid",
            BeepLevel::Near => "near",
            BeepLevel::Close => "close",
            BeepLevel::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for BeepLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who asked for a vision capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionSource {
    Sensor,
    Manual,
}

impl VisionSource {
    pub fn label(self) -> &'static str {
        match self {
            VisionSource::Sensor => "sensor",
            VisionSource::Manual => "manual",
        }
    }
}

impl fmt::Display for VisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Message carried by the event bus. Immutable once enqueued.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Beep(BeepLevel),
    Speak(String),
    VisionRequest(VisionSource),
    /// Sentinel that stops exactly one consumer.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_proximity_zone_has_a_tone() {
        assert_eq!(BeepLevel::from_zone(Zone::None), None);
        for (zone, level) in [
            (Zone::Far, BeepLevel::Far),
            (Zone::Mid, BeepLevel::Mid),
            (Zone::Near, BeepLevel::Near),
            (Zone::Close, BeepLevel::Close),
        ] {
            assert_eq!(BeepLevel::from_zone(zone), Some(level));
            assert_eq!(level.label(), zone.label());
        }
    }
}
