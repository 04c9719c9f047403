//! Live observer set and per-observer delivery queues.
//!
//! Each attached observer owns the receiving end of a bounded
//! `tokio::sync::mpsc` channel; the set keeps the sending ends keyed by a
//! random [`Uuid`].  Delivery is `try_send`, so publishing never waits on a
//! slow observer.  A closed channel (the observer task ended) or a full one
//! (the observer stopped draining) counts as "cannot accept data" and the
//! observer is evicted in the same call.
//!
//! Messages travel as [`Envelope`]s: the JSON text is produced once per
//! publish and shared between all queues behind an `Arc<str>`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hems_core::ObserverMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};
use uuid::Uuid;

/// Queue depth used when none is configured.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// One serialized observer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    log_seq: Option<u64>,
    json: Arc<str>,
}

impl Envelope {
    /// Serializes `msg` once.
    pub fn encode(msg: &ObserverMessage) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(msg)?;
        Ok(Self {
            log_seq: msg.log_seq(),
            json: Arc::from(json),
        })
    }

    pub fn json(&self) -> &str {
        &self.json
    }

    /// Sequence number when this envelope carries a log line.
    pub fn log_seq(&self) -> Option<u64> {
        self.log_seq
    }
}

/// The set of currently attached observers.
#[derive(Debug)]
pub struct SubscriberSet {
    sinks: Mutex<HashMap<Uuid, mpsc::Sender<Envelope>>>,
    depth: usize,
}

impl SubscriberSet {
    pub fn new(depth: usize) -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            depth: depth.max(1),
        }
    }

    /// Registers a new observer and returns its id and queue.
    pub fn attach(&self) -> (Uuid, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(self.depth);
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        info!("observer {id} attached");
        (id, rx)
    }

    /// Removes an observer.  Returns `false` if it was already gone.
    pub fn detach(&self, id: &Uuid) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            info!("observer {id} detached");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().contains_key(id)
    }

    /// Pushes `envelope` to every observer and evicts the ones that refuse.
    ///
    /// The sender list is copied under the lock; the pushes happen outside
    /// it.  Returns the number of observers that accepted the message.
    pub fn deliver(&self, envelope: &Envelope) -> usize {
        let targets: Vec<(Uuid, mpsc::Sender<Envelope>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut failed = Vec::new();
        for (id, tx) in &targets {
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!("observer {id} queue closed");
                    failed.push(*id);
                }
                Err(TrySendError::Full(_)) => {
                    debug!("observer {id} queue full");
                    failed.push(*id);
                }
            }
        }

        if !failed.is_empty() {
            let mut sinks = self.lock();
            for id in &failed {
                if sinks.remove(id).is_some() {
                    info!("observer {id} evicted after failed delivery");
                }
            }
        }
        targets.len() - failed.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Envelope>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubscriberSet {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

/// The observer side of an attachment.
///
/// Yields the initial snapshot first, then live deltas.  Log lines with a
/// sequence number at or below the snapshot watermark are already part of
/// the snapshot and are skipped.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    snapshot: VecDeque<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    log_watermark: u64,
}

impl Subscription {
    pub fn new(
        id: Uuid,
        snapshot: Vec<Envelope>,
        rx: mpsc::Receiver<Envelope>,
        log_watermark: u64,
    ) -> Self {
        Self {
            id,
            snapshot: snapshot.into(),
            rx,
            log_watermark,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of snapshot messages not yet handed out.
    pub fn pending_snapshot(&self) -> usize {
        self.snapshot.len()
    }

    /// Next message, waiting for a delta if the snapshot is drained.
    /// `None` once the observer has been evicted or detached.
    pub async fn next(&mut self) -> Option<Envelope> {
        if let Some(env) = self.snapshot.pop_front() {
            return Some(env);
        }
        loop {
            let env = self.rx.recv().await?;
            if !self.is_duplicate(&env) {
                return Some(env);
            }
        }
    }

    /// Non-waiting variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<Envelope> {
        if let Some(env) = self.snapshot.pop_front() {
            return Some(env);
        }
        while let Ok(env) = self.rx.try_recv() {
            if !self.is_duplicate(&env) {
                return Some(env);
            }
        }
        None
    }

    fn is_duplicate(&self, env: &Envelope) -> bool {
        matches!(env.log_seq, Some(seq) if seq <= self.log_watermark)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
