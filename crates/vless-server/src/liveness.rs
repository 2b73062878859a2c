//! Heartbeat supervision of accepted transports.
//!
//! Every admitted transport registers here and receives a [`LivenessHandle`].
//! On each tick the supervisor either asks the owner to send a ping (flag
//! was set since the last tick) or drops the registration (flag still clear),
//! which the owner observes as [`Probe::Terminate`]. Dropping the handle
//! unregisters it, so every exit path of a session cleans up the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What the supervisor asks of a transport owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Send a ping now.
    Send,
    /// A full interval passed without a pong: tear the transport down.
    Terminate,
}

struct Entry {
    alive: Arc<AtomicBool>,
    probe_tx: mpsc::Sender<()>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl Registry {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        // A panic while holding the lock leaves the map itself intact.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Periodic ping/pong supervisor over all registered transports.
#[derive(Clone)]
pub struct LivenessSupervisor {
    registry: Arc<Registry>,
    interval: Duration,
}

impl LivenessSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            interval,
        }
    }

    /// Register a transport. The flag starts set, so the first tick pings.
    pub fn register(&self) -> LivenessHandle {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        // Capacity 1: a probe still queued makes further ones redundant.
        let (probe_tx, probe_rx) = mpsc::channel(1);
        self.registry.entries().insert(
            id,
            Entry {
                alive: alive.clone(),
                probe_tx,
            },
        );
        debug!(transport_id = id, "transport registered for heartbeat");
        LivenessHandle {
            id,
            alive,
            probe_rx,
            registry: self.registry.clone(),
        }
    }

    /// Number of registered transports.
    pub fn count(&self) -> usize {
        self.registry.entries().len()
    }

    /// Run one heartbeat cycle. Returns how many transports were terminated.
    pub fn tick(&self) -> usize {
        let mut entries = self.registry.entries();
        let before = entries.len();
        entries.retain(|id, entry| {
            if !entry.alive.swap(false, Ordering::AcqRel) {
                info!(transport_id = id, "heartbeat missed, terminating transport");
                return false;
            }
            let _ = entry.probe_tx.try_send(());
            true
        });
        before - entries.len()
    }

    /// Tick forever at the configured interval. The first tick happens one
    /// full interval after start.
    pub async fn run(self) {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        loop {
            interval.tick().await;
            let terminated = self.tick();
            if terminated > 0 {
                debug!(terminated, remaining = self.count(), "heartbeat cycle");
            }
        }
    }
}

/// A transport's registration. Unregisters on drop.
pub struct LivenessHandle {
    id: u64,
    alive: Arc<AtomicBool>,
    probe_rx: mpsc::Receiver<()>,
    registry: Arc<Registry>,
}

impl LivenessHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Liveness flag setter, for whichever task reads the peer's pongs.
    pub fn pulse(&self) -> Pulse {
        Pulse(self.alive.clone())
    }

    /// Wait for the next request from the supervisor. Cancel safe.
    pub async fn next_probe(&mut self) -> Probe {
        match self.probe_rx.recv().await {
            Some(()) => Probe::Send,
            None => Probe::Terminate,
        }
    }
}

/// Records pongs for one registered transport.
#[derive(Clone)]
pub struct Pulse(Arc<AtomicBool>);

impl Pulse {
    pub fn beat(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Drop for LivenessHandle {
    fn drop(&mut self) {
        if self.registry.entries().remove(&self.id).is_some() {
            debug!(transport_id = self.id, "transport unregistered");
        }
    }
}
