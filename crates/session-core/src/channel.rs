use tokio::sync::{mpsc, watch};

use crate::types::{BridgeReady, SessionSnapshot};

/// Snapshot stream type used by session consumers.
pub type SnapshotStream = watch::Receiver<SessionSnapshot>;

/// Ready-signal intake and snapshot fan-out used by the synchronizer runtime.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    ready_tx: mpsc::Sender<BridgeReady>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionChannels {
    /// Create a new channel set and return it with the ready-signal receiver.
    pub fn new(ready_buffer: usize) -> (Self, mpsc::Receiver<BridgeReady>) {
        let (ready_tx, ready_rx) = mpsc::channel(ready_buffer.max(1));
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        (
            Self {
                ready_tx,
                snapshot_tx,
            },
            ready_rx,
        )
    }

    /// Clone the ready-signal sender handed to host integrations.
    pub fn ready_sender(&self) -> mpsc::Sender<BridgeReady> {
        self.ready_tx.clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> SnapshotStream {
        self.snapshot_tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn current(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Publish a snapshot; subscribers are only woken when it changed.
    ///
    /// Returns `true` when the stored snapshot was replaced.
    pub fn publish(&self, snapshot: SessionSnapshot) -> bool {
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        })
    }
}
