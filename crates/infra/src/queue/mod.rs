//! FIFO work queues with companion notification channels.
//!
//! A queue is a store list: producers push on the left, consumers pop on the
//! right, so order within one queue is publish order. Every publish also
//! emits the payload on `<queue>:notification`; the list entry is written
//! first, so a consumer woken by a notification always finds work unless
//! another consumer popped it in between (it then simply polls again).
//!
//! Priority is not a queue concern. The dispatcher expresses it with separate
//! lanes, and consumers pass the lanes in the order they should be drained.

pub mod consumer;

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use lumen_core::notification_channel;

use crate::config::Settings;
use crate::store::{KeyValueStore, StoreError, Subscription};

pub use consumer::{ConsumerHandle, ConsumerStats};

/// Documented wait between polls of an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The message could not be encoded, or a popped message could not be
    /// decoded (it has been removed from the queue and is lost).
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct QueueService<S> {
    store: S,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl<S: KeyValueStore> QueueService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn from_settings(store: S, settings: &Settings) -> Self {
        Self {
            store,
            poll_interval: settings.poll_interval,
            error_backoff: settings.error_backoff,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Enqueue `message` and notify subscribers. Returns the queue length.
    pub fn publish<T: Serialize + ?Sized>(&self, queue: &str, message: &T) -> Result<usize, QueueError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.publish_raw(queue, &payload)
    }

    pub fn publish_raw(&self, queue: &str, payload: &[u8]) -> Result<usize, QueueError> {
        let len = self.store.list_push_left(queue, payload)?;

        // The item is already durable; a lost notification only delays consumers
        // until their next poll.
        if let Err(e) = self.store.publish(&notification_channel(queue), payload) {
            warn!(queue, error = %e, "queue notification failed");
        }

        info!(queue, len, "message published");
        Ok(len)
    }

    /// Pop one message without waiting.
    ///
    /// An undecodable message is removed and reported as
    /// [`QueueError::Serialization`]; it is never put back.
    pub fn pop<T: DeserializeOwned>(&self, queue: &str) -> Result<Option<T>, QueueError> {
        let Some(payload) = self.store.list_pop_right(queue)? else {
            return Ok(None);
        };

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub fn len(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self.store.list_len(queue)?)
    }

    /// Subscribe to the notification channel of `queue`.
    pub fn subscribe(&self, queue: &str) -> Result<Subscription, QueueError> {
        Ok(self.store.subscribe(&notification_channel(queue))?)
    }

    /// Block until a message arrives on `queue` or `shutdown` fires.
    ///
    /// Returns `None` on cancellation. Cancellation is observed before every
    /// pop and during every wait, so it takes effect within one poll interval.
    pub fn consume<T: DeserializeOwned>(&self, queue: &str, shutdown: &Receiver<()>) -> Option<T> {
        self.consume_lanes(&[queue], shutdown).map(|(_, message)| message)
    }

    /// Like [`QueueService::consume`] over several lanes, drained in order:
    /// a later lane is only popped when every earlier one is empty.
    ///
    /// Returns the lane the message came from.
    pub fn consume_lanes<'q, T: DeserializeOwned>(
        &self,
        lanes: &[&'q str],
        shutdown: &Receiver<()>,
    ) -> Option<(&'q str, T)> {
        'poll: loop {
            if is_cancelled(shutdown) {
                return None;
            }

            for &lane in lanes {
                match self.pop::<T>(lane) {
                    Ok(Some(message)) => {
                        debug!(queue = lane, "message consumed");
                        return Some((lane, message));
                    }
                    Ok(None) => {}
                    Err(QueueError::Serialization(e)) => {
                        // Dropped rather than requeued so it can't loop forever.
                        warn!(queue = lane, error = %e, "dropping unparseable message");
                        continue 'poll;
                    }
                    Err(QueueError::StoreUnavailable(e)) => {
                        error!(queue = lane, error = %e, "failed to pop from queue");
                        if wait_cancelled(shutdown, self.error_backoff) {
                            return None;
                        }
                        continue 'poll;
                    }
                }
            }

            if wait_cancelled(shutdown, self.poll_interval) {
                return None;
            }
        }
    }
}

fn is_cancelled(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Sleep up to `timeout`, waking early on shutdown. Returns whether it fired.
fn wait_cancelled(shutdown: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(shutdown.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Msg {
        n: u32,
    }

    fn service() -> QueueService<Arc<InMemoryStore>> {
        QueueService::new(Arc::new(InMemoryStore::new())).with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn publish_then_pop_is_fifo() {
        let queues = service();
        assert_eq!(queues.publish("q", &Msg { n: 1 }).unwrap(), 1);
        assert_eq!(queues.publish("q", &Msg { n: 2 }).unwrap(), 2);
        assert_eq!(queues.len("q").unwrap(), 2);

        assert_eq!(queues.pop::<Msg>("q").unwrap(), Some(Msg { n: 1 }));
        assert_eq!(queues.pop::<Msg>("q").unwrap(), Some(Msg { n: 2 }));
        assert_eq!(queues.pop::<Msg>("q").unwrap(), None);
    }

    #[test]
    fn publish_notifies_with_same_payload_after_push() {
        let queues = service();
        let sub = queues.subscribe("q").unwrap();
        assert_eq!(sub.channel(), "q:notification");

        queues.publish("q", &Msg { n: 7 }).unwrap();

        let payload = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        let notified: Msg = serde_json::from_slice(&payload).unwrap();
        assert_eq!(notified, Msg { n: 7 });
        // Woken consumers find the item already in place.
        assert_eq!(queues.pop::<Msg>("q").unwrap(), Some(Msg { n: 7 }));
    }

    #[test]
    fn undecodable_message_is_dropped() {
        let queues = service();
        queues.publish_raw("q", b"{broken").unwrap();

        assert!(matches!(queues.pop::<Msg>("q"), Err(QueueError::Serialization(_))));
        assert_eq!(queues.len("q").unwrap(), 0);
    }

    #[test]
    fn consume_skips_poison_messages() {
        let queues = service();
        queues.publish_raw("q", b"garbage").unwrap();
        queues.publish("q", &Msg { n: 3 }).unwrap();

        let (_tx, rx) = mpsc::channel();
        assert_eq!(queues.consume::<Msg>("q", &rx), Some(Msg { n: 3 }));
    }

    #[test]
    fn consume_waits_for_a_late_message() {
        let queues = service();
        let producer = queues.clone();
        let (_tx, rx) = mpsc::channel();

        let started = Instant::now();
        let publisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            producer.publish("q", &Msg { n: 9 }).unwrap();
        });

        assert_eq!(queues.consume::<Msg>("q", &rx), Some(Msg { n: 9 }));
        assert!(started.elapsed() >= Duration::from_millis(60));
        publisher.join().unwrap();
    }

    #[test]
    fn consume_stops_mid_wait_on_shutdown() {
        let queues = QueueService::new(Arc::new(InMemoryStore::new()))
            .with_poll_interval(Duration::from_secs(30));
        let (tx, rx) = mpsc::channel();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(()).unwrap();
        });

        let started = Instant::now();
        assert_eq!(queues.consume::<Msg>("q", &rx), None);
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn dropped_shutdown_sender_cancels() {
        let queues = service();
        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);
        assert_eq!(queues.consume::<Msg>("q", &rx), None);
    }

    #[test]
    fn lanes_are_drained_in_order() {
        let queues = service();
        queues.publish("q", &Msg { n: 1 }).unwrap();
        queues.publish("q:high", &Msg { n: 2 }).unwrap();

        let (_tx, rx) = mpsc::channel();
        let lanes = ["q:high", "q"];

        assert_eq!(queues.consume_lanes::<Msg>(&lanes, &rx), Some(("q:high", Msg { n: 2 })));
        assert_eq!(queues.consume_lanes::<Msg>(&lanes, &rx), Some(("q", Msg { n: 1 })));
    }
}
