//! Audio consumer: drains the general event queue into a tone worker and a
//! serialized speech worker.

use std::{io, thread, time::Duration};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use fusion_core::{BeepLevel, Event};
use tracing::{debug, info, warn};

use crate::assist::{
    collaborators::{SpeechSink, Tone, TonePlayer, tone_for},
    telemetry::{self, join_worker},
};

pub const TONE_QUEUE_CAPACITY: usize = 8;
pub const TONE_GAP: Duration = Duration::from_millis(50);
pub const SPEECH_GAP: Duration = Duration::from_millis(100);

/// Spawn the audio consumer and its two playback workers.
///
/// The consumer stops on [`Event::Shutdown`]; queued speech still plays
/// before it returns.
pub fn spawn_audio_consumer(
    events: Receiver<Event>,
    tone_player: Box<dyn TonePlayer>,
    speech: Box<dyn SpeechSink>,
) -> io::Result<thread::JoinHandle<()>> {
    let (tone_tx, tone_rx) = bounded::<Tone>(TONE_QUEUE_CAPACITY);
    let (speech_tx, speech_rx) = unbounded::<String>();
    let tone_worker = spawn_tone_worker(tone_rx, tone_player)?;
    let speech_worker = spawn_speech_worker(speech_rx, speech)?;

    telemetry::spawn_thread("assist-audio", move || {
        let _span = tracing::info_span!("assist.audio").entered();
        let mut dispatcher = AudioDispatcher::new(tone_tx, speech_tx);
        for event in events.iter() {
            if !dispatcher.handle(event) {
                break;
            }
        }
        drop(dispatcher);
        join_worker("tone", tone_worker);
        join_worker("speech", speech_worker);
        debug!("audio consumer stopped");
    })
}

/// Routing and dedup policy of the audio consumer.
pub struct AudioDispatcher {
    tones: Sender<Tone>,
    speech: Sender<String>,
    last_spoken: Option<String>,
}

impl AudioDispatcher {
    pub fn new(tones: Sender<Tone>, speech: Sender<String>) -> Self {
        Self {
            tones,
            speech,
            last_spoken: None,
        }
    }

    /// Returns `false` when the consumer should stop.
    pub fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Beep(level) => self.beep(level),
            Event::Speak(text) => self.speak(text),
            Event::VisionRequest(source) => {
                warn!(%source, "vision request on the audio queue ignored");
            }
            Event::Shutdown => return false,
        }
        true
    }

    fn beep(&self, level: BeepLevel) {
        match self.tones.try_send(tone_for(level)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(%level, "tone queue full; dropping beep");
                metrics::counter!("assist_beeps_dropped_total").increment(1);
            }
            Err(TrySendError::Disconnected(_)) => warn!(%level, "tone worker gone"),
        }
    }

    fn speak(&mut self, text: String) {
        if self.last_spoken.as_deref() == Some(text.as_str()) {
            debug!(%text, "skipping repeated utterance");
            return;
        }
        if self.speech.send(text.clone()).is_err() {
            warn!("speech worker gone");
            return;
        }
        self.last_spoken = Some(text);
    }
}

fn spawn_tone_worker(
    tones: Receiver<Tone>,
    mut player: Box<dyn TonePlayer>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("assist-tone", move || {
        for tone in tones.iter() {
            if let Err(err) = player.play(tone) {
                warn!("tone playback failed: {err}");
                metrics::counter!("assist_collaborator_failures_total", "collaborator" => "tone")
                    .increment(1);
            }
            thread::sleep(TONE_GAP);
        }
    })
}

fn spawn_speech_worker(
    texts: Receiver<String>,
    mut sink: Box<dyn SpeechSink>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("assist-speech", move || {
        for text in texts.iter() {
            info!(%text, "speaking");
            if let Err(err) = sink.speak(&text) {
                warn!("speech playback failed: {err}");
                metrics::counter!("assist_collaborator_failures_total", "collaborator" => "speech")
                    .increment(1);
            }
            thread::sleep(SPEECH_GAP);
        }
    })
}
