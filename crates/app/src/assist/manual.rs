//! Manual capture trigger (Enter on stdin by default).

use std::{
    io::{self, BufRead},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use fusion_core::{CooldownGate, Event, VisionSource};
use tracing::{debug, info};

use crate::assist::{bus::EventPublisher, telemetry};

pub const MANUAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManualPoll {
    Triggered,
    Idle,
    /// The input source is exhausted.
    Closed,
}

/// Source of manual triggers, polled with a timeout.
pub trait ManualInput: Send {
    fn poll(&mut self, timeout: Duration) -> ManualPoll;
}

impl ManualInput for Receiver<()> {
    fn poll(&mut self, timeout: Duration) -> ManualPoll {
        match self.recv_timeout(timeout) {
            Ok(()) => ManualPoll::Triggered,
            Err(RecvTimeoutError::Timeout) => ManualPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => ManualPoll::Closed,
        }
    }
}

/// Each line read from stdin is one trigger.
///
/// The blocking read lives on a detached thread; the worker only sees the
/// channel, so it stays responsive to shutdown.
pub struct StdinTrigger {
    lines: Receiver<()>,
}

impl StdinTrigger {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = unbounded();
        thread::Builder::new()
            .name("assist-stdin".into())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    if line.is_err() || tx.send(()).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self { lines: rx })
    }
}

impl ManualInput for StdinTrigger {
    fn poll(&mut self, timeout: Duration) -> ManualPoll {
        self.lines.poll(timeout)
    }
}

/// Poll `input` until shutdown, publishing gated manual vision requests.
pub fn spawn_manual_worker(
    mut input: Box<dyn ManualInput>,
    gate: CooldownGate,
    publisher: EventPublisher,
    shutdown: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("assist-manual", move || {
        while !shutdown.load(Ordering::Relaxed) {
            match input.poll(MANUAL_POLL_INTERVAL) {
                ManualPoll::Triggered => trigger(&gate, &publisher, Instant::now()),
                ManualPoll::Idle => {}
                ManualPoll::Closed => {
                    debug!("manual input closed");
                    break;
                }
            }
        }
    })
}

fn trigger(gate: &CooldownGate, publisher: &EventPublisher, now: Instant) {
    match gate.try_fire(now) {
        Ok(()) => {
            info!("manual vision trigger");
            metrics::counter!("assist_vision_requests_total", "source" => VisionSource::Manual.label())
                .increment(1);
            publisher.publish(Event::VisionRequest(VisionSource::Manual));
        }
        Err(remaining) => {
            info!(
                remaining_ms = remaining.as_millis() as u64,
                "manual trigger on cooldown"
            );
            metrics::counter!("assist_vision_suppressed_total").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;
    use crate::assist::bus::EventBus;

    #[test]
    fn triggers_share_the_cooldown_gate() {
        let bus = EventBus::new();
        let gate = CooldownGate::new(Duration::from_secs(10));
        let (tx, rx) = bounded(4);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle =
            spawn_manual_worker(Box::new(rx), gate.clone(), bus.publisher(), shutdown.clone())
                .unwrap();

        tx.send(()).unwrap();
        tx.send(()).unwrap();
        drop(tx);
        handle.join().unwrap();

        let requests: Vec<_> = bus.vision_requests().try_iter().collect();
        assert_eq!(requests, vec![Event::VisionRequest(VisionSource::Manual)]);
        assert!(gate.remaining(Instant::now()).is_some());
    }

    #[test]
    fn stops_on_shutdown_flag() {
        let bus = EventBus::new();
        let (_tx, rx) = bounded::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_manual_worker(
            Box::new(rx),
            CooldownGate::new(Duration::from_secs(10)),
            bus.publisher(),
            shutdown.clone(),
        )
        .unwrap();
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(bus.vision_requests().is_empty());
    }
}
