use chrono::NaiveDateTime;
use thiserror::Error;

/// Cells along one side of the depth grid.
pub const GRID_SIDE: usize = 8;
/// Total cells in one depth grid (row-major, 8×8).
pub const GRID_CELLS: usize = GRID_SIDE * GRID_SIDE;

/// Which sensor produced a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// 8×8 time-of-flight depth grid, values in meters.
    DepthGrid,
    /// Single-beam ultrasonic range, value in centimeters.
    Ultrasonic,
}

impl SensorKind {
    /// Tag used by the text-log format.
    pub fn tag(self) -> &'static str {
        match self {
            SensorKind::DepthGrid => "TOF",
            SensorKind::Ultrasonic => "US",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "TOF" => Some(SensorKind::DepthGrid),
            "US" => Some(SensorKind::Ultrasonic),
            _ => None,
        }
    }

    /// Number of values a well-formed sample of this kind carries.
    pub fn expected_len(self) -> usize {
        match self {
            SensorKind::DepthGrid => GRID_CELLS,
            SensorKind::Ultrasonic => 1,
        }
    }
}

/// One typed reading produced by the frame decoder or the text-log parser.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorSample {
    pub kind: SensorKind,
    /// Capture time on the host, not embedded in the wire frame.
    pub timestamp: NaiveDateTime,
    pub values: Vec<f32>,
}

impl SensorSample {
    pub fn depth_grid(timestamp: NaiveDateTime, values: Vec<f32>) -> Self {
        Self {
            kind: SensorKind::DepthGrid,
            timestamp,
            values,
        }
    }

    pub fn ultrasonic(timestamp: NaiveDateTime, centimeters: f32) -> Self {
        Self {
            kind: SensorKind::Ultrasonic,
            timestamp,
            values: vec![centimeters],
        }
    }

    /// Check the value count and reject non-finite readings.
    pub fn validate(&self) -> Result<(), SampleError> {
        let expected = self.kind.expected_len();
        if self.values.len() != expected {
            return Err(SampleError::WrongLength {
                kind: self.kind,
                expected,
                actual: self.values.len(),
            });
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(SampleError::NonFinite {
                kind: self.kind,
                index,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("{kind:?} sample must carry {expected} values, got {actual}")]
    WrongLength {
        kind: SensorKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind:?} sample has a non-finite value at index {index}")]
    NonFinite { kind: SensorKind, index: usize },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {path:?} at {baud} baud")]
    OpenSerial {
        path: String,
        baud: u32,
        #[source]
        source: serialport::Error,
    },
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
