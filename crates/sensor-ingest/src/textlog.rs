//! Line-oriented text log format used for offline replay and fixtures.
//!
//! One record per line: `TYPE|YYYY-MM-DD HH:MM:SS|[v1,v2,...]` where `TYPE`
//! is `TOF` (64 meter values) or `US` (one centimeter value).

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::types::{SampleError, SensorKind, SensorSample};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Characters of an offending line kept in log messages.
pub const EXCERPT_LEN: usize = 60;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("missing '|' delimiter")]
    MissingDelimiter,
    #[error("expected TYPE|TIMESTAMP|[VALUES]")]
    MissingField,
    #[error("unknown sensor type {0:?}")]
    UnknownSensor(String),
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("malformed value list {0:?}")]
    ValueList(String),
    #[error("invalid number {0:?}")]
    Number(String),
    #[error(transparent)]
    Shape(#[from] SampleError),
}

/// Strip transport noise (NUL, CR, BOM) and surrounding whitespace.
pub fn clean_line(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\0' | '\r' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// First [`EXCERPT_LEN`] characters of a line for log output.
pub fn excerpt(line: &str) -> String {
    let mut out: String = line.chars().take(EXCERPT_LEN).collect();
    if line.chars().count() > EXCERPT_LEN {
        out.push_str("...");
    }
    out
}

/// Parse one log line.
///
/// Returns `Ok(None)` for blank lines so callers can skip them silently.
pub fn parse_line(raw: &str) -> Result<Option<SensorSample>, ParseError> {
    let line = clean_line(raw);
    if line.is_empty() {
        return Ok(None);
    }
    if !line.contains('|') {
        return Err(ParseError::MissingDelimiter);
    }

    let mut fields = line.splitn(3, '|');
    let (Some(tag), Some(timestamp), Some(values)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(ParseError::MissingField);
    };

    let tag = tag.trim();
    let kind = SensorKind::from_tag(tag).ok_or_else(|| ParseError::UnknownSensor(tag.into()))?;

    let timestamp = NaiveDateTime::parse_from_str(timestamp.trim(), TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::Timestamp(timestamp.trim().into()))?;

    let values = parse_values(values.trim())?;
    let sample = SensorSample {
        kind,
        timestamp,
        values,
    };
    sample.validate()?;
    Ok(Some(sample))
}

fn parse_values(field: &str) -> Result<Vec<f32>, ParseError> {
    let inner = field
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
        .filter(|inner| !inner.is_empty())
        .ok_or_else(|| ParseError::ValueList(excerpt(field)))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<f32>().map_err(|_| ParseError::Number(v.into())))
        .collect()
}

/// Render a sample in the log format. Values use the shortest representation
/// that parses back to the same `f32`.
pub fn format_line(sample: &SensorSample) -> String {
    let values = sample
        .values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}|{}|[{}]",
        sample.kind.tag(),
        sample.timestamp.format(TIMESTAMP_FORMAT),
        values
    )
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn tof_line(values: &[f32]) -> String {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("TOF|2025-01-01 00:00:00|[{joined}]")
    }

    #[test]
    fn parses_depth_grid_and_round_trips() {
        let values: Vec<f32> = [0.7, 0.8].iter().copied().cycle().take(64).collect();
        let line = tof_line(&values);
        let sample = parse_line(&line).unwrap().unwrap();
        assert_eq!(sample.kind, SensorKind::DepthGrid);
        assert_eq!(sample.values.len(), 64);
        for (parsed, expected) in sample.values.iter().zip(&values) {
            assert_abs_diff_eq!(*parsed, *expected, epsilon = 1e-6);
        }
        assert_eq!(format_line(&sample), line);
    }

    #[test]
    fn parses_ultrasonic_with_noise_characters() {
        let sample = parse_line("US|2025-10-12 21:03:11|[ 87.3 ]\r\0")
            .unwrap()
            .unwrap();
        assert_eq!(sample.kind, SensorKind::Ultrasonic);
        assert_abs_diff_eq!(sample.values[0], 87.3, epsilon = 1e-5);
    }

    #[test]
    fn blank_lines_are_skipped_silently() {
        assert_eq!(parse_line("   \r\n"), Ok(None));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(
            parse_line("# header without delimiter"),
            Err(ParseError::MissingDelimiter)
        );
        assert!(matches!(
            parse_line("LIDAR|2025-01-01 00:00:00|[1.0]"),
            Err(ParseError::UnknownSensor(_))
        ));
        assert!(matches!(
            parse_line("US|yesterday|[1.0]"),
            Err(ParseError::Timestamp(_))
        ));
        assert!(matches!(
            parse_line("US|2025-01-01 00:00:00|87.3"),
            Err(ParseError::ValueList(_))
        ));
        assert!(matches!(
            parse_line("US|2025-01-01 00:00:00|[8x.3]"),
            Err(ParseError::Number(_))
        ));
        assert!(matches!(
            parse_line("TOF|2025-01-01 00:00:00|[0.5,0.6]"),
            Err(ParseError::Shape(SampleError::WrongLength { .. }))
        ));
    }

    #[test]
    fn excerpt_truncates_long_lines() {
        let long = "x".repeat(100);
        let short = excerpt(&long);
        assert_eq!(short.len(), EXCERPT_LEN + 3);
        assert_eq!(excerpt("abc"), "abc");
    }
}
