//! Binary frame decoding for the sensor head's serial stream.
//!
//! Wire layout (135 bytes):
//!
//! ```text
//! 0xAA 0x55 | 64 × u16 LE depth (mm) | f32 LE ultrasonic (cm) | checksum
//! ```
//!
//! The checksum is the low byte of the sum of every preceding frame byte.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::types::{GRID_CELLS, SensorSample};

/// Two-byte sync pattern that opens every frame.
pub const SYNC_HEADER: [u8; 2] = [0xAA, 0x55];
const DEPTH_BYTES: usize = GRID_CELLS * 2;
const ULTRASONIC_BYTES: usize = 4;
/// Total size of one frame on the wire.
pub const FRAME_SIZE: usize = SYNC_HEADER.len() + DEPTH_BYTES + ULTRASONIC_BYTES + 1;

/// A checksum-validated frame, still in wire units.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub depth_mm: [u16; GRID_CELLS],
    pub ultrasonic_cm: f32,
}

impl Frame {
    /// Serialize into the exact wire representation, checksum included.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_SIZE);
        bytes.extend_from_slice(&SYNC_HEADER);
        for cell in self.depth_mm {
            bytes.extend_from_slice(&cell.to_le_bytes());
        }
        bytes.extend_from_slice(&self.ultrasonic_cm.to_le_bytes());
        bytes.push(checksum(&bytes));
        bytes
    }

    /// Depth grid converted to meters, row-major.
    pub fn depth_meters(&self) -> Vec<f32> {
        self.depth_mm.iter().map(|&mm| f32::from(mm) / 1000.0).collect()
    }

    /// Split into the depth-grid and ultrasonic samples sharing one capture time.
    pub fn into_samples(self, timestamp: NaiveDateTime) -> [SensorSample; 2] {
        [
            SensorSample::depth_grid(timestamp, self.depth_meters()),
            SensorSample::ultrasonic(timestamp, self.ultrasonic_cm),
        ]
    }

    fn parse(bytes: &[u8]) -> Self {
        let payload = &bytes[SYNC_HEADER.len()..FRAME_SIZE - 1];
        let mut depth_mm = [0u16; GRID_CELLS];
        for (cell, pair) in depth_mm.iter_mut().zip(payload[..DEPTH_BYTES].chunks_exact(2)) {
            *cell = u16::from_le_bytes([pair[0], pair[1]]);
        }
        let us = &payload[DEPTH_BYTES..DEPTH_BYTES + ULTRASONIC_BYTES];
        let ultrasonic_cm = f32::from_le_bytes([us[0], us[1], us[2], us[3]]);
        Self {
            depth_mm,
            ultrasonic_cm,
        }
    }
}

/// Low 8 bits of the byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Outcome of one decode attempt.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Frame(Frame),
    NeedMoreData,
}

/// Running counters kept by the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub checksum_failures: u64,
    pub bytes_discarded: u64,
}

/// Incremental decoder over an append-only byte buffer.
///
/// Bytes are appended with [`FrameDecoder::extend`] as they arrive from the
/// transport and frames are pulled with [`FrameDecoder::decode_next`] until it
/// reports [`Decoded::NeedMoreData`]. Garbage between frames is skipped and a
/// bad checksum only costs the candidate header, so decoding never fails.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Drop any partial data, e.g. after the transport was reopened.
    pub fn reset(&mut self) {
        self.stats.bytes_discarded += self.buffer.len() as u64;
        self.buffer.clear();
    }

    pub fn decode_next(&mut self) -> Decoded {
        loop {
            let Some(start) = find_header(&self.buffer) else {
                self.discard_headerless();
                return Decoded::NeedMoreData;
            };
            if start > 0 {
                debug!(discarded = start, "skipping bytes before sync header");
                self.stats.bytes_discarded += start as u64;
                self.buffer.drain(..start);
            }
            if self.buffer.len() < FRAME_SIZE {
                return Decoded::NeedMoreData;
            }

            let expected = checksum(&self.buffer[..FRAME_SIZE - 1]);
            let actual = self.buffer[FRAME_SIZE - 1];
            if expected != actual {
                self.stats.checksum_failures += 1;
                self.stats.bytes_discarded += SYNC_HEADER.len() as u64;
                warn!(
                    expected,
                    actual, "bad frame checksum; resynchronising past header"
                );
                self.buffer.drain(..SYNC_HEADER.len());
                continue;
            }

            let frame = Frame::parse(&self.buffer[..FRAME_SIZE]);
            self.buffer.drain(..FRAME_SIZE);
            self.stats.frames += 1;
            return Decoded::Frame(frame);
        }
    }

    /// No header anywhere: drop the buffer, keeping a trailing first sync
    /// byte whose partner has not arrived yet.
    fn discard_headerless(&mut self) {
        let keep = usize::from(self.buffer.last() == Some(&SYNC_HEADER[0]));
        let discarded = self.buffer.len() - keep;
        if discarded == 0 {
            return;
        }
        warn!(discarded, "no sync header in buffer; discarding bytes");
        self.stats.bytes_discarded += discarded as u64;
        self.buffer.drain(..discarded);
    }

    /// Drain every complete frame currently buffered.
    pub fn decode_all(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Decoded::Frame(frame) = self.decode_next() {
            frames.push(frame);
        }
        frames
    }
}

fn find_header(buffer: &[u8]) -> Option<usize> {
    buffer.windows(SYNC_HEADER.len()).position(|w| w == SYNC_HEADER)
}
