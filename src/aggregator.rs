//! Session event buffer and periodic delivery.
//!
//! Both analyzers append; one flush worker drains. Delivery is at-most-once:
//! a batch the store rejects is reported on the error channel and dropped.

use anyhow::{anyhow, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{ErrorKind, ProctorError};
use crate::storage::{with_store, SharedStore};
use crate::ProctorEvent;

/// Arrival-ordered event buffer. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct EventAggregator {
    events: Arc<Mutex<Vec<ProctorEvent>>>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ProctorEvent>>> {
        self.events
            .lock()
            .map_err(|_| anyhow!("event buffer lock poisoned"))
    }

    pub fn append(&self, event: ProctorEvent) -> Result<()> {
        self.lock()?.push(event);
        Ok(())
    }

    pub fn extend(&self, events: impl IntoIterator<Item = ProctorEvent>) -> Result<()> {
        self.lock()?.extend(events);
        Ok(())
    }

    /// Empty the buffer and return what it held, or `None` when it was empty.
    pub fn drain(&self) -> Result<Option<EventBatch>> {
        let events = std::mem::take(&mut *self.lock()?);
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(EventBatch::new(events)))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A drained batch. `digest` is SHA-256 over the event ids in order.
#[derive(Clone, Debug, PartialEq)]
pub struct EventBatch {
    pub events: Vec<ProctorEvent>,
    pub digest: String,
}

impl EventBatch {
    pub fn new(events: Vec<ProctorEvent>) -> Self {
        let mut hasher = Sha256::new();
        for ev in &events {
            hasher.update(ev.id().as_bytes());
            hasher.update(b"\n");
        }
        Self {
            events,
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub batches_dropped: u64,
    pub events_dropped: u64,
    pub last_digest: Option<String>,
}

/// Drains `aggregator` into `store` every `interval` on its own thread.
pub struct FlushWorker {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<FlushStats>>,
}

impl FlushWorker {
    pub fn spawn(
        session_id: String,
        aggregator: EventAggregator,
        store: SharedStore,
        interval: Duration,
        errors: Sender<ProctorError>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::<()>();
        let join = std::thread::Builder::new()
            .name("proctor-flush".to_string())
            .spawn(move || {
                let mut stats = FlushStats::default();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            flush_once(&session_id, &aggregator, &store, &errors, &mut stats)
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Final forced flush.
                flush_once(&session_id, &aggregator, &store, &errors, &mut stats);
                stats
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    /// Stop the timer, perform the final flush and return delivery stats.
    pub fn finish(mut self) -> Result<FlushStats> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("flush worker thread panicked")),
            None => Ok(FlushStats::default()),
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Drain once and deliver. The buffer lock is released before the store is
/// called, so producers never wait on delivery.
pub fn flush_once(
    session_id: &str,
    aggregator: &EventAggregator,
    store: &SharedStore,
    errors: &Sender<ProctorError>,
    stats: &mut FlushStats,
) {
    let batch = match aggregator.drain() {
        Ok(Some(batch)) => batch,
        Ok(None) => return,
        Err(err) => {
            let _ = errors.send(ProctorError::from_anyhow(
                ErrorKind::Delivery,
                "aggregator",
                &err,
            ));
            return;
        }
    };
    match with_store(store, |s| s.append_events(session_id, &batch.events)) {
        Ok(()) => {
            log::debug!(
                "flushed {} events to session {} ({})",
                batch.len(),
                session_id,
                batch.digest
            );
            stats.batches_delivered += 1;
            stats.events_delivered += batch.len() as u64;
            stats.last_digest = Some(batch.digest);
        }
        Err(err) => {
            log::warn!(
                "dropping {} events for session {}: {:#}",
                batch.len(),
                session_id,
                err
            );
            stats.batches_dropped += 1;
            stats.events_dropped += batch.len() as u64;
            let _ = errors.send(ProctorError::from_anyhow(
                ErrorKind::Delivery,
                "aggregator",
                &err,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, InMemorySessionStore};
    use crate::EventType;

    fn event(ts: i64) -> ProctorEvent {
        ProctorEvent::new(EventType::LookingAway, ts)
    }

    #[test]
    fn drain_empties_in_arrival_order() {
        let agg = EventAggregator::new();
        let producer = agg.clone();
        producer.append(event(30)).unwrap();
        producer.append(event(10)).unwrap();
        assert_eq!(agg.len(), 2);

        let batch = agg.drain().unwrap().unwrap();
        let ts: Vec<i64> = batch.events.iter().map(|e| e.ts()).collect();
        assert_eq!(ts, vec![30, 10]);
        assert!(agg.is_empty());
        assert!(agg.drain().unwrap().is_none());
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let agg = EventAggregator::new();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        agg.append(event(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        let mut drained = 0;
        for th in threads {
            th.join().unwrap();
        }
        while let Some(batch) = agg.drain().unwrap() {
            drained += batch.len();
        }
        assert_eq!(drained, 1000);
    }

    #[test]
    fn digest_depends_on_ids() {
        let a = EventBatch::new(vec![ProctorEvent::with_id("a", EventType::NoFace, 1)]);
        let b = EventBatch::new(vec![ProctorEvent::with_id("b", EventType::NoFace, 1)]);
        let a2 = EventBatch::new(vec![ProctorEvent::with_id("a", EventType::PhoneDetected, 9)]);
        assert_ne!(a.digest, b.digest);
        assert_eq!(a.digest, a2.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn finish_performs_final_flush() {
        let store = shared(InMemorySessionStore::new());
        let id = with_store(&store, |s| s.create_session("Ada", None)).unwrap();
        let agg = EventAggregator::new();
        let (tx, rx) = channel();
        let worker = FlushWorker::spawn(
            id.clone(),
            agg.clone(),
            store.clone(),
            Duration::from_secs(3600),
            tx,
        )
        .unwrap();
        agg.append(event(1)).unwrap();
        agg.append(event(2)).unwrap();
        let stats = worker.finish().unwrap();
        assert_eq!(stats.events_delivered, 2);
        assert!(rx.try_recv().is_err());
        let session = with_store(&store, |s| s.get_session(&id)).unwrap();
        assert_eq!(session.events.len(), 2);
    }

    #[test]
    fn periodic_flush_delivers_while_running() {
        let store = shared(InMemorySessionStore::new());
        let id = with_store(&store, |s| s.create_session("Ada", None)).unwrap();
        let agg = EventAggregator::new();
        let (tx, _rx) = channel();
        let worker = FlushWorker::spawn(
            id.clone(),
            agg.clone(),
            store.clone(),
            Duration::from_millis(10),
            tx,
        )
        .unwrap();
        agg.append(event(1)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !agg.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = worker.finish().unwrap();
        assert_eq!(stats.events_delivered, 1);
    }

    #[test]
    fn failed_delivery_is_reported_and_dropped() {
        let store = shared(InMemorySessionStore::new());
        let agg = EventAggregator::new();
        let (tx, rx) = channel();
        agg.append(event(1)).unwrap();
        let mut stats = FlushStats::default();
        flush_once("missing", &agg, &store, &tx, &mut stats);
        assert_eq!(stats.events_dropped, 1);
        assert!(agg.is_empty());
        assert_eq!(rx.try_recv().unwrap().kind, ErrorKind::Delivery);
    }
}
