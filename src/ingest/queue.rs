//! Bounded fire-and-forget insert queue.
//!
//! The ingestion worker hands captured events to this queue and moves on; a
//! dedicated writer thread inserts them. The queue never applies
//! backpressure to the stream. Its overflow policy is drop-newest: when the
//! buffer is full the event being submitted is discarded, counted and
//! logged. Insert failures are counted and logged, never retried.

use crate::events::CapturedEventStore;
use crate::types::CapturedEvent;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Accepted into the buffer.
    pub submitted: u64,
    /// Inserted successfully.
    pub written: u64,
    /// Insert attempted and failed.
    pub failed: u64,
    /// Rejected because the buffer was full or closed.
    pub dropped: u64,
}

pub struct InsertQueue {
    sender: Option<Sender<CapturedEvent>>,
    counters: Arc<Counters>,
    capacity: usize,
    writer: Option<JoinHandle<()>>,
}

impl InsertQueue {
    /// Start the writer thread.
    pub fn spawn(events: CapturedEventStore, capacity: usize) -> std::io::Result<Self> {
        let (sender, receiver) = bounded::<CapturedEvent>(capacity);
        let counters = Arc::new(Counters::default());

        let writer_counters = Arc::clone(&counters);
        let writer = std::thread::Builder::new()
            .name("termwatch-insert".into())
            .spawn(move || {
                for mut event in receiver.iter() {
                    match events.insert(&mut event) {
                        Ok(()) => {
                            writer_counters.written.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            writer_counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                id = %event.record.id,
                                provider_id = %event.provider_id,
                                error = %e,
                                "unable to store captured event"
                            );
                        }
                    }
                }
                tracing::debug!("insert queue writer exiting");
            })?;

        Ok(Self {
            sender: Some(sender),
            counters,
            capacity,
            writer: Some(writer),
        })
    }

    /// Hand an event to the writer. Returns false if it was dropped.
    pub fn submit(&self, event: CapturedEvent) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    provider_id = %event.provider_id,
                    capacity = self.capacity,
                    dropped,
                    "insert queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting events and wait for the writer to drain the buffer.
    pub fn shutdown(mut self) {
        self.sender = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

impl Drop for InsertQueue {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish what is buffered and
        // exit on its own; it is not joined here.
        self.sender = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::repository::Repository;
    use crate::storage::{DocumentCollection, MemoryCollection, ReplaceOutcome, StoredDocument};
    use crate::types::RecordMeta;
    use crossbeam_channel::Receiver;
    use std::time::{Duration, Instant};

    fn event(provider_id: &str) -> CapturedEvent {
        CapturedEvent {
            record: RecordMeta::new(),
            provider_id: provider_id.to_string(),
            text: String::new(),
            full_text: None,
            matched_terms: Default::default(),
            author: Default::default(),
            geo: Default::default(),
            lang: None,
            source_created_at: None,
            engagement: Default::default(),
            raw: String::new(),
            raw_digest: String::new(),
        }
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Collection whose inserts announce themselves and then wait for a
    /// release token.
    struct GatedCollection {
        inner: MemoryCollection,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl DocumentCollection for GatedCollection {
        fn name(&self) -> &str {
            "gated"
        }
        fn insert_document(&self, doc: StoredDocument) -> Result<()> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.inner.insert_document(doc)
        }
        fn replace_if_newer(&self, doc: StoredDocument) -> Result<ReplaceOutcome> {
            self.inner.replace_if_newer(doc)
        }
        fn find_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
            self.inner.find_by_id(id)
        }
        fn find_all(&self) -> Result<Vec<StoredDocument>> {
            self.inner.find_all()
        }
        fn delete_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
            self.inner.delete_by_id(id)
        }
        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_events_are_written() {
        let store = CapturedEventStore::in_memory();
        let queue = InsertQueue::spawn(store.clone(), 16).unwrap();

        for i in 0..5 {
            assert!(queue.submit(event(&i.to_string())));
        }
        queue.shutdown();

        assert_eq!(store.count(), 5);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (entered_tx, entered_rx) = bounded(16);
        let (release_tx, release_rx) = bounded(16);
        let collection = GatedCollection {
            inner: MemoryCollection::new("gated"),
            entered: entered_tx,
            release: release_rx,
        };
        let store = CapturedEventStore::new(Repository::new(Arc::new(collection)));
        let queue = InsertQueue::spawn(store.clone(), 1).unwrap();

        // First event is picked up by the writer, which then blocks
        assert!(queue.submit(event("1")));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Second fills the buffer, third overflows
        assert!(queue.submit(event("2")));
        assert!(!queue.submit(event("3")));

        let stats = queue.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.dropped, 1);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        wait_for(|| queue.stats().written == 2);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_insert_failures_are_counted() {
        let store = CapturedEventStore::in_memory();
        let queue = InsertQueue::spawn(store.clone(), 16).unwrap();

        let first = event("1");
        let mut duplicate = first.clone();
        duplicate.provider_id = "dup".into();

        assert!(queue.submit(first));
        assert!(queue.submit(duplicate));
        assert!(queue.submit(event("2")));
        wait_for(|| {
            let stats = queue.stats();
            stats.written + stats.failed == 3
        });

        let stats = queue.stats();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(store.count(), 2);
    }
}
