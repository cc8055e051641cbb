//! Background consumer threads.

use std::fmt::Display;
use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::QueueService;
use crate::store::KeyValueStore;

/// Handle to control and join a consumer thread.
///
/// Dropping the handle without calling [`ConsumerHandle::shutdown`] also stops
/// the consumer (its shutdown channel disconnects), but does not wait for it.
#[derive(Debug)]
pub struct ConsumerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl ConsumerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the consumer to stop without waiting for it.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Request shutdown and wait for the consumer to stop.
    ///
    /// Returns within one poll interval plus the time to finish the message
    /// being handled, if any.
    pub fn shutdown(mut self) {
        self.request_shutdown();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerStats {
    pub messages_handled: u64,
    pub handler_failures: u64,
}

impl<S> QueueService<S>
where
    S: KeyValueStore + Clone + 'static,
{
    /// Spawn a thread that consumes `lanes` (drained in order) until shutdown.
    ///
    /// Handler errors are logged and counted; the message is not requeued.
    pub fn spawn_consumer<T, H, E>(
        &self,
        name: impl Into<String>,
        lanes: Vec<String>,
        mut handler: H,
    ) -> io::Result<ConsumerHandle>
    where
        T: DeserializeOwned + 'static,
        H: FnMut(T) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ConsumerStats::default()));

        let queues = self.clone();
        let thread_stats = stats.clone();
        let thread_name = name.clone();

        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            let lanes: Vec<&str> = lanes.iter().map(String::as_str).collect();
            info!(consumer = %thread_name, queues = ?lanes, "consumer started");

            while let Some((lane, message)) = queues.consume_lanes::<T>(&lanes, &shutdown_rx) {
                let outcome = handler(message);

                if let Ok(mut s) = thread_stats.lock() {
                    s.messages_handled += 1;
                    if outcome.is_err() {
                        s.handler_failures += 1;
                    }
                }

                if let Err(e) = outcome {
                    warn!(consumer = %thread_name, queue = lane, error = %e, "message handler failed");
                }
            }

            info!(consumer = %thread_name, "consumer stopped");
        })?;

        Ok(ConsumerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::{Duration, Instant};

    fn service() -> QueueService<Arc<InMemoryStore>> {
        QueueService::new(Arc::new(InMemoryStore::new())).with_poll_interval(Duration::from_millis(20))
    }

    /// Stats once `n` messages are counted. The counter is bumped after the
    /// handler returns, so a handler's side effect can be seen first.
    fn stats_after(handle: &ConsumerHandle, n: u64) -> ConsumerStats {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let stats = handle.stats();
            if stats.messages_handled >= n || Instant::now() >= deadline {
                return stats;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn consumer_handles_messages_until_shutdown() {
        let queues = service();
        let (seen_tx, seen_rx) = mpsc::channel::<u32>();

        let handle = queues
            .spawn_consumer("test-consumer", vec!["q".to_string()], move |n: u32| {
                seen_tx.send(n).map_err(|e| e.to_string())
            })
            .unwrap();
        assert_eq!(handle.name(), "test-consumer");

        queues.publish("q", &1u32).unwrap();
        queues.publish("q", &2u32).unwrap();

        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);

        let stats = stats_after(&handle, 2);
        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stats.messages_handled, 2);
        assert_eq!(stats.handler_failures, 0);
    }

    #[test]
    fn handler_failures_are_counted_not_fatal() {
        let queues = service();
        let (seen_tx, seen_rx) = mpsc::channel::<u32>();

        let handle = queues
            .spawn_consumer("flaky", vec!["q".to_string()], move |n: u32| {
                let _ = seen_tx.send(n);
                if n % 2 == 0 { Err(format!("even: {n}")) } else { Ok(()) }
            })
            .unwrap();

        for n in 1..=4u32 {
            queues.publish("q", &n).unwrap();
        }
        for _ in 1..=4 {
            seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }

        let stats = stats_after(&handle, 4);
        handle.shutdown();
        assert_eq!(stats.messages_handled, 4);
        assert_eq!(stats.handler_failures, 2);
    }
}
