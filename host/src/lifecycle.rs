//! Connection state shared between the network tasks and the tick loop
//!
//! Two kinds of peer are tracked:
//! - the head-mounted client, which connects to the stream transport and is
//!   then reached back over a second, outbound socket. Its progress is the
//!   single process-wide [`ConnectionStatus`].
//! - controller/headset peers on the event transport, tracked per
//!   connection as they connect and disconnect.
//!
//! Status transitions:
//!
//! ```text
//! NotConnected -> Ready -> Attempting -> Connected
//!                                     \-> Error
//! ```
//!
//! `Connected` and `Error` are final for the session; nothing reconnects or
//! retries automatically.

use crate::error::TransportError;
use crate::transport::ConnectionId;
use log::{error, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    Ready,
    Attempting,
    Connected,
    Error,
}

#[derive(Debug)]
struct StatusCell {
    status: ConnectionStatus,
    reachable_peer: Option<SocketAddr>,
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    cell: Mutex<StatusCell>,
    peers: Mutex<HashMap<ConnectionId, SocketAddr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(StatusCell {
                status: ConnectionStatus::NotConnected,
                reachable_peer: None,
            }),
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.cell).status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Address of the first peer accepted on the stream transport
    pub fn reachable_peer(&self) -> Option<SocketAddr> {
        lock(&self.cell).reachable_peer
    }

    /// Called on every accept; only the first moves `NotConnected -> Ready`
    pub fn mark_peer_reachable(&self, addr: SocketAddr) -> bool {
        let mut cell = lock(&self.cell);
        if cell.status != ConnectionStatus::NotConnected {
            return false;
        }
        cell.status = ConnectionStatus::Ready;
        cell.reachable_peer = Some(addr);
        info!("Peer {} reachable, reverse channel ready", addr);
        true
    }

    /// `Ready -> Attempting`. Returns false if no attempt should start.
    pub fn begin_attempt(&self) -> bool {
        let mut cell = lock(&self.cell);
        if cell.status != ConnectionStatus::Ready {
            return false;
        }
        cell.status = ConnectionStatus::Attempting;
        true
    }

    /// Records the outcome of the connect attempt started by [`begin_attempt`](Self::begin_attempt)
    pub fn finish_attempt(&self, outcome: Result<SocketAddr, TransportError>) -> ConnectionStatus {
        let mut cell = lock(&self.cell);
        if cell.status != ConnectionStatus::Attempting {
            return cell.status;
        }

        cell.status = match outcome {
            Ok(addr) => {
                info!("Reverse channel connected to {}", addr);
                ConnectionStatus::Connected
            }
            Err(e) => {
                error!("Reverse channel connect failed: {}", e);
                ConnectionStatus::Error
            }
        };
        cell.status
    }

    pub fn peer_connected(&self, connection: ConnectionId, addr: SocketAddr) {
        lock(&self.peers).insert(connection, addr);
        info!("Peer connection {} opened from {}", connection, addr);
    }

    /// Returns false for a connection that was never seen or already closed
    pub fn peer_disconnected(&self, connection: ConnectionId) -> bool {
        match lock(&self.peers).remove(&connection) {
            Some(addr) => {
                info!("Peer connection {} from {} closed", connection, addr);
                true
            }
            None => false,
        }
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn addr() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    #[test]
    fn test_successful_handshake() {
        let lifecycle = ConnectionLifecycle::new();
        assert_eq!(lifecycle.status(), ConnectionStatus::NotConnected);
        assert!(!lifecycle.begin_attempt());

        assert!(lifecycle.mark_peer_reachable(addr()));
        assert_eq!(lifecycle.status(), ConnectionStatus::Ready);
        assert_eq!(lifecycle.reachable_peer(), Some(addr()));

        assert!(lifecycle.begin_attempt());
        assert!(!lifecycle.begin_attempt());
        assert_eq!(lifecycle.status(), ConnectionStatus::Attempting);

        let status = lifecycle.finish_attempt(Ok(addr()));
        assert_eq!(status, ConnectionStatus::Connected);
        assert!(lifecycle.is_connected());
    }

    #[test]
    fn test_failed_attempt_is_not_retried() {
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.mark_peer_reachable(addr());
        lifecycle.begin_attempt();

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let status = lifecycle.finish_attempt(Err(refused.into()));
        assert_eq!(status, ConnectionStatus::Error);

        // Later accepts do not restart the cycle
        assert!(!lifecycle.mark_peer_reachable(addr()));
        assert!(!lifecycle.begin_attempt());
        assert_eq!(lifecycle.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_connected_is_terminal() {
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.mark_peer_reachable(addr());
        lifecycle.begin_attempt();
        lifecycle.finish_attempt(Ok(addr()));

        assert!(!lifecycle.mark_peer_reachable(addr()));
        assert_eq!(
            lifecycle.finish_attempt(Err(TransportError::NoConnectTarget)),
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn test_peer_table() {
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.peer_connected(1, addr());
        lifecycle.peer_connected(2, addr());
        assert_eq!(lifecycle.peer_count(), 2);

        assert!(lifecycle.peer_disconnected(1));
        assert!(!lifecycle.peer_disconnected(1));
        assert!(!lifecycle.peer_disconnected(42));
        assert_eq!(lifecycle.peer_count(), 1);
    }
}
