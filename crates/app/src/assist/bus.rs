//! Two independent FIFO queues connecting producers to consumers.
//!
//! General events (beeps, speech) and vision requests travel separately so a
//! slow capture never delays an alert tone. There is no logic here beyond
//! routing: dedup and debouncing are consumer policies.

use crossbeam_channel::{Receiver, Sender, unbounded};
use fusion_core::Event;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Queue {
    Events,
    Vision,
}

impl Queue {
    pub fn label(self) -> &'static str {
        match self {
            Queue::Events => "events",
            Queue::Vision => "vision",
        }
    }
}

/// Owner of both queues; hands out publishers and consumer receivers.
pub struct EventBus {
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    vision_tx: Sender<Event>,
    vision_rx: Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        let (vision_tx, vision_rx) = unbounded();
        Self {
            events_tx,
            events_rx,
            vision_tx,
            vision_rx,
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            events: self.events_tx.clone(),
            vision: self.vision_tx.clone(),
        }
    }

    pub fn events(&self) -> Receiver<Event> {
        self.events_rx.clone()
    }

    pub fn vision_requests(&self) -> Receiver<Event> {
        self.vision_rx.clone()
    }

    /// Enqueue one [`Event::Shutdown`] per consumer of `queue`.
    pub fn shutdown(&self, queue: Queue, consumers: usize) {
        let tx = match queue {
            Queue::Events => &self.events_tx,
            Queue::Vision => &self.vision_tx,
        };
        for _ in 0..consumers {
            if tx.send(Event::Shutdown).is_err() {
                warn!(queue = queue.label(), "queue closed before shutdown sentinel");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct EventPublisher {
    events: Sender<Event>,
    vision: Sender<Event>,
}

impl EventPublisher {
    /// Route `event` to its queue: vision requests to the vision queue,
    /// everything else to the general queue. Returns `false` once the bus is gone.
    pub fn publish(&self, event: Event) -> bool {
        let queue = match event {
            Event::VisionRequest(_) => Queue::Vision,
            _ => Queue::Events,
        };
        let tx = match queue {
            Queue::Events => &self.events,
            Queue::Vision => &self.vision,
        };
        let delivered = tx.send(event).is_ok();
        metrics::gauge!("assist_queue_depth", "queue" => queue.label()).set(tx.len() as f64);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use fusion_core::{BeepLevel, VisionSource};

    use super::*;

    #[test]
    fn routes_by_event_kind() {
        let bus = EventBus::new();
        let publisher = bus.publisher();
        assert!(publisher.publish(Event::Beep(BeepLevel::Near)));
        assert!(publisher.publish(Event::VisionRequest(VisionSource::Manual)));
        assert!(publisher.publish(Event::Speak("door".into())));

        let events: Vec<_> = bus.events().try_iter().collect();
        assert_eq!(
            events,
            vec![Event::Beep(BeepLevel::Near), Event::Speak("door".into())]
        );
        assert_eq!(
            bus.vision_requests().try_recv().unwrap(),
            Event::VisionRequest(VisionSource::Manual)
        );
    }

    #[test]
    fn each_producer_keeps_its_order() {
        let bus = EventBus::new();
        let producers: Vec<_> = (0..4)
            .map(|id| {
                let publisher = bus.publisher();
                thread::spawn(move || {
                    for n in 0..100 {
                        publisher.publish(Event::Speak(format!("{id}:{n}")));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last_seen = [None::<u32>; 4];
        for event in bus.events().try_iter() {
            let Event::Speak(text) = event else {
                panic!("unexpected event {event:?}");
            };
            let (id, n) = text.split_once(':').unwrap();
            let (id, n): (usize, u32) = (id.parse().unwrap(), n.parse().unwrap());
            assert!(last_seen[id].is_none_or(|prev| prev < n));
            last_seen[id] = Some(n);
        }
        assert!(last_seen.iter().all(|n| *n == Some(99)));
    }

    #[test]
    fn shutdown_sends_one_sentinel_per_consumer() {
        let bus = EventBus::new();
        bus.shutdown(Queue::Vision, 2);
        let sentinels: Vec<_> = bus.vision_requests().try_iter().collect();
        assert_eq!(sentinels, vec![Event::Shutdown, Event::Shutdown]);
        assert!(bus.events().is_empty());
    }
}
