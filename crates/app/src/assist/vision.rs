//! Vision consumer: captures on request, captions off the intake path and
//! speaks the result.

use std::{
    io, thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use fusion_core::{CooldownGate, Event, VisionSource};
use tracing::{debug, info, warn};

use crate::assist::{
    bus::EventPublisher,
    collaborators::{Captioner, FrameCapture, ImageHandle, clean_caption},
    telemetry::{self, join_worker},
};

/// Slack on the dispatch gate, so a request that passed the shared trigger gate
/// is not suppressed because its predecessor was dequeued late.
pub const DISPATCH_TOLERANCE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Capture succeeded and the image went to the caption worker.
    Dispatched,
    /// Suppressed; the gate reopens after the given duration.
    OnCooldown(Duration),
    CaptureFailed,
}

/// Capture-and-dispatch step with its own debounce gate.
pub struct VisionDispatcher {
    capture: Box<dyn FrameCapture>,
    gate: CooldownGate,
    captions: Sender<ImageHandle>,
}

impl VisionDispatcher {
    pub fn new(capture: Box<dyn FrameCapture>, cooldown: Duration, captions: Sender<ImageHandle>) -> Self {
        Self {
            capture,
            gate: CooldownGate::new(cooldown.saturating_sub(DISPATCH_TOLERANCE)),
            captions,
        }
    }

    pub fn dispatch(&mut self, source: VisionSource, now: Instant) -> DispatchOutcome {
        if let Err(remaining) = self.gate.try_fire(now) {
            info!(
                %source,
                remaining_ms = remaining.as_millis() as u64,
                "vision request on cooldown"
            );
            metrics::counter!("assist_vision_suppressed_total").increment(1);
            return DispatchOutcome::OnCooldown(remaining);
        }

        let image = match self.capture.capture() {
            Ok(image) => image,
            Err(err) => {
                warn!(%source, "capture failed: {err}");
                metrics::counter!("assist_collaborator_failures_total", "collaborator" => "capture")
                    .increment(1);
                return DispatchOutcome::CaptureFailed;
            }
        };
        debug!(%source, image = %image.path.display(), "captured");
        if let Err(unsent) = self.captions.send(image) {
            warn!("caption worker gone");
            unsent.0.discard();
        }
        DispatchOutcome::Dispatched
    }
}

/// Spawn the vision consumer and its caption worker.
///
/// Stops on [`Event::Shutdown`] after the in-flight captions finish and their
/// text has been published.
pub fn spawn_vision_consumer(
    requests: Receiver<Event>,
    publisher: EventPublisher,
    capture: Box<dyn FrameCapture>,
    captioner: Box<dyn Captioner>,
    cooldown: Duration,
) -> io::Result<thread::JoinHandle<()>> {
    let (caption_tx, caption_rx) = unbounded::<ImageHandle>();
    let caption_worker = spawn_caption_worker(caption_rx, captioner, publisher)?;

    telemetry::spawn_thread("assist-vision", move || {
        let _span = tracing::info_span!("assist.vision").entered();
        let mut dispatcher = VisionDispatcher::new(capture, cooldown, caption_tx);
        for event in requests.iter() {
            match event {
                Event::VisionRequest(source) => {
                    dispatcher.dispatch(source, Instant::now());
                }
                Event::Shutdown => break,
                other => warn!(?other, "unexpected event on the vision queue"),
            }
        }
        drop(dispatcher);
        join_worker("caption", caption_worker);
        debug!("vision consumer stopped");
    })
}

fn spawn_caption_worker(
    images: Receiver<ImageHandle>,
    mut captioner: Box<dyn Captioner>,
    publisher: EventPublisher,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("assist-caption", move || {
        for image in images.iter() {
            let started = Instant::now();
            let result = captioner.caption(&image);
            image.discard();
            let raw = match result {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(image = %image.path.display(), "captioning failed: {err}");
                    metrics::counter!("assist_collaborator_failures_total", "collaborator" => "caption")
                        .increment(1);
                    continue;
                }
            };
            match clean_caption(&raw) {
                Some(text) => {
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "caption: {text}"
                    );
                    publisher.publish(Event::Speak(text));
                }
                None => debug!(image = %image.path.display(), "empty caption dropped"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::{
        bus::{EventBus, Queue},
        collaborators::CollaboratorError,
    };

    struct CountingCapture(u32);

    impl FrameCapture for CountingCapture {
        fn capture(&mut self) -> Result<ImageHandle, CollaboratorError> {
            self.0 += 1;
            Ok(ImageHandle::external(format!("frame-{}.jpg", self.0)))
        }
    }

    #[test]
    fn requests_inside_the_cooldown_are_suppressed() {
        let (tx, rx) = unbounded();
        let mut dispatcher =
            VisionDispatcher::new(Box::new(CountingCapture(0)), Duration::from_secs(10), tx);
        let t0 = Instant::now();

        assert_eq!(dispatcher.dispatch(VisionSource::Sensor, t0), DispatchOutcome::Dispatched);
        assert_eq!(
            dispatcher.dispatch(VisionSource::Manual, t0 + Duration::from_secs(2)),
            DispatchOutcome::OnCooldown(Duration::from_secs(8) - DISPATCH_TOLERANCE)
        );
        assert_eq!(rx.try_iter().count(), 1);

        assert_eq!(
            dispatcher.dispatch(VisionSource::Manual, t0 + Duration::from_secs(10)),
            DispatchOutcome::Dispatched
        );
        assert_eq!(rx.try_recv().unwrap().path, std::path::PathBuf::from("frame-2.jpg"));
    }

    #[test]
    fn late_dequeue_of_an_earlier_request_does_not_suppress_the_next() {
        let (tx, rx) = unbounded();
        let mut dispatcher =
            VisionDispatcher::new(Box::new(CountingCapture(0)), Duration::from_secs(10), tx);
        let t0 = Instant::now();

        // Triggered at t0 but dequeued 150 ms later; the next trigger passed
        // the shared gate at exactly t0 + 10 s.
        let dequeued = t0 + Duration::from_millis(150);
        assert_eq!(dispatcher.dispatch(VisionSource::Sensor, dequeued), DispatchOutcome::Dispatched);
        assert_eq!(
            dispatcher.dispatch(VisionSource::Manual, t0 + Duration::from_secs(10)),
            DispatchOutcome::Dispatched
        );
        assert_eq!(rx.try_iter().count(), 2);
    }

    struct FileCapture {
        dir: std::path::PathBuf,
        taken: u32,
    }

    impl FrameCapture for FileCapture {
        fn capture(&mut self) -> Result<ImageHandle, CollaboratorError> {
            self.taken += 1;
            let path = self.dir.join(format!("capture-{}.jpg", self.taken));
            std::fs::write(&path, b"jpeg").unwrap();
            Ok(ImageHandle::temporary(path))
        }
    }

    struct ScriptedCaptioner(Vec<Result<String, CollaboratorError>>);

    impl Captioner for ScriptedCaptioner {
        fn caption(&mut self, image: &ImageHandle) -> Result<String, CollaboratorError> {
            assert!(image.path.exists());
            self.0.remove(0)
        }
    }

    #[test]
    fn captured_images_are_removed_after_captioning() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let captioner = ScriptedCaptioner(vec![
            Ok("a photo of a bench".into()),
            Err(CollaboratorError::MissingImage(dir.path().join("capture-2.jpg"))),
        ]);
        let handle = spawn_vision_consumer(
            bus.vision_requests(),
            bus.publisher(),
            Box::new(FileCapture {
                dir: dir.path().to_path_buf(),
                taken: 0,
            }),
            Box::new(captioner),
            Duration::ZERO,
        )
        .unwrap();

        let publisher = bus.publisher();
        publisher.publish(Event::VisionRequest(VisionSource::Manual));
        publisher.publish(Event::VisionRequest(VisionSource::Manual));
        bus.shutdown(Queue::Vision, 1);
        handle.join().unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(
            bus.events().try_iter().collect::<Vec<_>>(),
            vec![Event::Speak("a bench".into())]
        );
    }
}
