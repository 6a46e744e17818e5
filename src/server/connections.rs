use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
struct OpenConnection {
    peer: SocketAddr,
    kill: CancellationToken,
}

/// Connections currently being served. Entries are added when a connection
/// is accepted and removed when its [`ConnectionGuard`] drops, whichever way
/// the connection ended.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, OpenConnection>>,
    emptied: Notify,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> MutexGuard<'_, HashMap<u64, OpenConnection>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(self: &Arc<Self>, peer: SocketAddr) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kill = CancellationToken::new();
        self.open().insert(
            id,
            OpenConnection {
                peer,
                kill: kill.clone(),
            },
        );
        debug!("Tracking connection {} from {}", id, peer);
        ConnectionGuard {
            id,
            kill,
            table: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.open().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open().is_empty()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.open().values().map(|conn| conn.peer).collect()
    }

    /// Signals every tracked connection to close. Returns how many were
    /// signalled; entries leave the table as their tasks wind down.
    pub fn close_all(&self) -> usize {
        let open = self.open();
        for (id, conn) in open.iter() {
            info!("Closing connection {} from {}", id, conn.peer);
            conn.kill.cancel();
        }
        open.len()
    }

    /// Waits until the table is empty or `timeout` passes. Returns whether
    /// it emptied.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.emptied.notified();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn remove(&self, id: u64) {
        let mut open = self.open();
        if open.remove(&id).is_some() {
            debug!("Connection {} closed", id);
        }
        if open.is_empty() {
            self.emptied.notify_waiters();
        }
    }
}

/// Holds a connection's table entry for as long as the connection task runs.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    kill: CancellationToken,
    table: Arc<ConnectionTable>,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancelled when the server force-closes this connection.
    pub fn killed(&self) -> &CancellationToken {
        &self.kill
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
