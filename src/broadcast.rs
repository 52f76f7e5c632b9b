//! Registry of connected reload clients.
//!
//! Each client is represented by a bounded channel. The [`Broadcaster`] holds
//! the sending half, keyed by [`ClientId`], and the client's socket task owns
//! the receiving half as a [`Subscription`]. A broadcast is a non-blocking
//! `try_send` to every member while the registry lock is held, so membership
//! cannot change under the iteration and a removed client can never be sent
//! to again. A client whose channel is closed or full is pruned on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Text frame that tells a browser to reload.
pub const RELOAD_MESSAGE: &str = "reload";

/// Opaque handle for a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notification delivered to a subscribed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Reload,
}

impl Signal {
    /// Wire text for this signal.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reload => RELOAD_MESSAGE,
        }
    }
}

/// Receiving side of a registration, owned by the client's connection task.
#[derive(Debug)]
pub struct Subscription {
    id: ClientId,
    rx: mpsc::Receiver<Signal>,
}

impl Subscription {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Wait for the next signal. `None` once the broadcaster has dropped this
    /// client, either by pruning it or on shutdown.
    ///
    /// Signals still queued at the moment of removal are discarded: the
    /// registry held the only sender, so a closed channel means this client
    /// is no longer a member.
    pub async fn recv(&mut self) -> Option<Signal> {
        let signal = self.rx.recv().await?;
        if self.rx.is_closed() {
            return None;
        }
        Some(signal)
    }
}

/// Outcome of one [`Broadcaster::broadcast_reload`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Owns the set of live reload clients.
#[derive(Debug)]
pub struct Broadcaster {
    clients: Mutex<HashMap<ClientId, mpsc::Sender<Signal>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Broadcaster {
    /// Create an empty registry. `buffer` is how many undelivered signals a
    /// client may queue before it counts as stalled.
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, mpsc::Sender<Signal>>> {
        // Nothing in the critical sections can panic half way through a
        // mutation, so a poisoned map is still consistent.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new client and return its receiving side.
    pub fn register(&self) -> Subscription {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        let live = {
            let mut clients = self.lock();
            clients.insert(id, tx);
            clients.len()
        };
        debug!(client = %id, live, "reload client registered");
        Subscription { id, rx }
    }

    /// Remove a client. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ClientId) -> bool {
        let (removed, live) = {
            let mut clients = self.lock();
            let removed = clients.remove(&id).is_some();
            (removed, clients.len())
        };
        if removed {
            debug!(client = %id, live, "reload client unregistered");
        }
        removed
    }

    /// Queue a reload for every registered client.
    ///
    /// Clients whose channel is closed, or still full from earlier signals,
    /// are removed.
    pub fn broadcast_reload(&self) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut clients = self.lock();

        clients.retain(|id, tx| match tx.try_send(Signal::Reload) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(client = %id, "reload client stalled, dropping");
                report.pruned += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = %id, "reload client gone, dropping");
                report.pruned += 1;
                false
            }
        });

        report
    }

    /// Drop every client. Their subscriptions observe `None` and end.
    pub fn close_all(&self) -> usize {
        let mut clients = self.lock();
        let n = clients.len();
        clients.clear();
        n
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
