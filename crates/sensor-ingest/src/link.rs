//! Reconnecting frame link: transport + decoder + rate limiter.

use std::{
    io::{ErrorKind, Read},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
    frame::{DecodeStats, Frame, FrameDecoder},
    transport::{ByteStream, Connector},
};

const READ_CHUNK: usize = 256;
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct LinkOptions {
    /// Delay before reopening the transport after a failure.
    pub reconnect_delay: Duration,
    /// Frames arriving sooner than this after the last accepted one are dropped.
    pub min_frame_interval: Option<Duration>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            min_frame_interval: Some(Duration::from_millis(50)),
        }
    }
}

/// What one [`FrameLink::poll`] call produced.
#[derive(Debug, Default)]
pub struct LinkPoll {
    pub frames: Vec<Frame>,
    /// Raw bytes read from the transport during this poll.
    pub bytes_read: usize,
    /// Frames decoded but dropped by the rate limiter.
    pub rate_limited: usize,
    /// Whether a (re)connection attempt failed or the stream broke.
    pub transport_failed: bool,
}

/// Owns the transport connection and frame decoder.
///
/// A failed open or read is never fatal: the link logs it, closes the stream,
/// waits the reconnect delay and tries again on the next poll, indefinitely.
pub struct FrameLink<C: Connector> {
    connector: C,
    options: LinkOptions,
    stream: Option<ByteStream>,
    decoder: FrameDecoder,
    last_accepted: Option<Instant>,
    attempts: u64,
    scratch: [u8; READ_CHUNK],
}

impl<C: Connector> FrameLink<C> {
    pub fn new(connector: C, options: LinkOptions) -> Self {
        Self {
            connector,
            options,
            stream: None,
            decoder: FrameDecoder::new(),
            last_accepted: None,
            attempts: 0,
            scratch: [0u8; READ_CHUNK],
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn decode_stats(&self) -> DecodeStats {
        self.decoder.stats()
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Close the stream so the next poll reopens it. Returns `false` when no
    /// stream was open, i.e. the link was already reconnecting.
    pub fn force_reconnect(&mut self) -> bool {
        self.decoder.reset();
        if self.stream.take().is_none() {
            return false;
        }
        warn!("closing {} for reconnect", self.connector.describe());
        true
    }

    /// Read whatever is available (bounded by the transport read timeout) and
    /// return the frames it completed.
    pub fn poll(&mut self, shutdown: &AtomicBool) -> LinkPoll {
        let mut result = LinkPoll::default();

        if self.stream.is_none() {
            self.attempts += 1;
            info!(
                attempt = self.attempts,
                "connecting to {}",
                self.connector.describe()
            );
            match self.connector.connect() {
                Ok(stream) => {
                    info!("connection to {} established", self.connector.describe());
                    self.stream = Some(stream);
                }
                Err(err) => {
                    warn!(
                        "transport error: {err}; reconnecting in {:.1}s",
                        self.options.reconnect_delay.as_secs_f32()
                    );
                    result.transport_failed = true;
                    self.backoff(shutdown);
                    return result;
                }
            }
        }

        let Some(stream) = self.stream.as_mut() else {
            return result;
        };

        match stream.read(&mut self.scratch) {
            Ok(0) => {
                warn!(
                    "{} closed the stream; reconnecting in {:.1}s",
                    self.connector.describe(),
                    self.options.reconnect_delay.as_secs_f32()
                );
                result.transport_failed = true;
                self.drop_stream();
                self.backoff(shutdown);
            }
            Ok(n) => {
                result.bytes_read = n;
                self.decoder.extend(&self.scratch[..n]);
                for frame in self.decoder.decode_all() {
                    if self.admit(Instant::now()) {
                        result.frames.push(frame);
                    } else {
                        result.rate_limited += 1;
                    }
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!(
                    "read from {} failed: {err}; reconnecting in {:.1}s",
                    self.connector.describe(),
                    self.options.reconnect_delay.as_secs_f32()
                );
                result.transport_failed = true;
                self.drop_stream();
                self.backoff(shutdown);
            }
        }

        result
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.decoder.reset();
    }

    fn admit(&mut self, now: Instant) -> bool {
        let Some(min_interval) = self.options.min_frame_interval else {
            return true;
        };
        match self.last_accepted {
            Some(last) if now.duration_since(last) < min_interval => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }

    /// Sleep the reconnect delay in short slices so shutdown stays responsive.
    fn backoff(&self, shutdown: &AtomicBool) {
        let deadline = Instant::now() + self.options.reconnect_delay;
        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(BACKOFF_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, io::Cursor};

    use super::*;
    use crate::{frame::FRAME_SIZE, types::TransportError};

    struct ScriptedConnector {
        streams: VecDeque<Result<Vec<u8>, ()>>,
    }

    impl Connector for ScriptedConnector {
        fn connect(&mut self) -> Result<ByteStream, TransportError> {
            match self.streams.pop_front() {
                Some(Ok(bytes)) => Ok(Box::new(Cursor::new(bytes))),
                _ => Err(TransportError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    "no device",
                ))),
            }
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn frame_bytes(count: usize) -> Vec<u8> {
        let frame = Frame {
            depth_mm: [1000; 64],
            ultrasonic_cm: 100.0,
        };
        (0..count).flat_map(|_| frame.encode()).collect()
    }

    fn fast_options(min_frame_interval: Option<Duration>) -> LinkOptions {
        LinkOptions {
            reconnect_delay: Duration::from_millis(1),
            min_frame_interval,
        }
    }

    #[test]
    fn reconnects_after_open_failure() {
        let connector = ScriptedConnector {
            streams: VecDeque::from([Err(()), Ok(frame_bytes(1))]),
        };
        let mut link = FrameLink::new(connector, fast_options(None));
        let shutdown = AtomicBool::new(false);

        let first = link.poll(&shutdown);
        assert!(first.transport_failed);
        assert!(!link.is_connected());

        let second = link.poll(&shutdown);
        assert!(!second.transport_failed);
        assert_eq!(second.frames.len(), 1);
        assert_eq!(link.attempts(), 2);
    }

    #[test]
    fn end_of_stream_triggers_reconnect() {
        let connector = ScriptedConnector {
            streams: VecDeque::from([Ok(Vec::new()), Ok(frame_bytes(1))]),
        };
        let mut link = FrameLink::new(connector, fast_options(None));
        let shutdown = AtomicBool::new(false);

        let poll = link.poll(&shutdown);
        assert!(poll.transport_failed);
        assert!(!link.is_connected());

        let mut total = 0;
        for _ in 0..3 {
            total += link.poll(&shutdown).frames.len();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn rate_limiter_drops_burst_frames() {
        let bytes = frame_bytes(1);
        assert_eq!(bytes.len(), FRAME_SIZE);
        // 256-byte reads: the first completes one frame, the second the other two.
        let connector = ScriptedConnector {
            streams: VecDeque::from([Ok(frame_bytes(3))]),
        };
        let mut link = FrameLink::new(connector, fast_options(Some(Duration::from_secs(60))));
        let shutdown = AtomicBool::new(false);

        let mut accepted = 0;
        let mut dropped = 0;
        for _ in 0..3 {
            let poll = link.poll(&shutdown);
            accepted += poll.frames.len();
            dropped += poll.rate_limited;
        }
        assert_eq!(accepted, 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn forced_reconnect_reports_whether_a_stream_was_closed() {
        let connector = ScriptedConnector {
            streams: VecDeque::from([Err(()), Ok(frame_bytes(1))]),
        };
        let mut link = FrameLink::new(connector, fast_options(None));
        let shutdown = AtomicBool::new(false);

        assert!(link.poll(&shutdown).transport_failed);
        assert!(!link.force_reconnect());

        assert_eq!(link.poll(&shutdown).frames.len(), 1);
        assert!(link.is_connected());
        assert!(link.force_reconnect());
        assert!(!link.is_connected());
    }
}
