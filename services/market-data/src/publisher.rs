//! Sequenced fan-out of engine events
//!
//! Sequencing and sending happen under one lock so the broadcast order is
//! the sequence order. Publishing never blocks on slow subscribers: the
//! channel is bounded and a lagging receiver loses the oldest events and
//! is told so with a resync notice.

use chrono::{DateTime, Utc};
use matching_engine::EngineEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::events::{StreamEvent, StreamPayload};

pub struct StreamPublisher {
    last_sequence: Mutex<u64>,
    tx: broadcast::Sender<Arc<StreamEvent>>,
}

impl StreamPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            last_sequence: Mutex::new(0),
            tx,
        }
    }

    /// Stamp and broadcast events in order; returns the last sequence used
    pub fn publish<I>(&self, events: I, now: DateTime<Utc>) -> u64
    where
        I: IntoIterator<Item = EngineEvent>,
    {
        let mut last = self.last_sequence.lock().unwrap_or_else(|p| p.into_inner());
        for event in events {
            *last += 1;
            let stamped = StreamEvent {
                sequence: *last,
                timestamp: now,
                payload: StreamPayload::from(event),
            };
            // No subscribers is not an error
            let _ = self.tx.send(Arc::new(stamped));
        }
        *last
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            last_seen: self.last_sequence(),
        }
    }

    pub fn last_sequence(&self) -> u64 {
        *self.last_sequence.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the stream
pub struct Subscription {
    rx: broadcast::Receiver<Arc<StreamEvent>>,
    last_seen: u64,
}

impl Subscription {
    /// Next event, or a resync notice if this subscriber fell behind
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<Arc<StreamEvent>> {
        match self.rx.recv().await {
            Ok(event) => {
                self.last_seen = event.sequence;
                Some(event)
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, last_seen = self.last_seen, "stream subscriber lagged");
                Some(Arc::new(StreamEvent::resync(self.last_seen, missed, Utc::now())))
            }
            Err(RecvError::Closed) => {
                debug!("stream closed");
                None
            }
        }
    }
}
