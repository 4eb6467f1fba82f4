//! Ingestion side of the sensor head: turns a raw serial byte stream (or a
//! recorded text log) into typed [`SensorSample`]s.
//!
//! - `frame`: checksum-validated binary frame decoder.
//! - `textlog`: `TYPE|TIMESTAMP|[values]` parser and formatter.
//! - `transport`: serial / TCP connectors.
//! - `link`: reconnecting transport + decoder loop with a frame-rate cap.
//! - `replay`: background text-log reader.

pub mod frame;
pub mod link;
pub mod replay;
pub mod textlog;
pub mod transport;
mod types;

pub use frame::{DecodeStats, Decoded, FRAME_SIZE, Frame, FrameDecoder, SYNC_HEADER};
pub use link::{FrameLink, LinkOptions, LinkPoll};
pub use replay::{ReplaySummary, spawn_log_replay};
pub use textlog::{ParseError, format_line, parse_line};
pub use transport::{ByteStream, Connector, SystemConnector, TransportSpec};
pub use types::{GRID_CELLS, GRID_SIDE, SampleError, SensorKind, SensorSample, TransportError};
