//! Reverse channel to the head-mounted client

use crate::error::TransportError;
use crate::lifecycle::ConnectionLifecycle;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Fire-and-forget frame output. Failures are logged by the sink.
pub trait PacketSink: Send + Sync {
    fn send(&self, frame: Vec<u8>);
}

/// Starts the reverse-channel connect attempt
///
/// Called at most once per session, after the lifecycle has moved to
/// `Attempting`. The implementation reports the outcome through
/// [`ConnectionLifecycle::finish_attempt`].
pub trait Connector: Send + Sync {
    fn connect(&self, lifecycle: Arc<ConnectionLifecycle>);
}

/// Where the reverse channel connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseTarget {
    pub explicit: Option<SocketAddr>,
    pub port: u16,
}

impl ReverseTarget {
    /// An explicit address wins, else the reachable peer's IP at `port`
    pub fn resolve(&self, peer: Option<SocketAddr>) -> Result<SocketAddr, TransportError> {
        if let Some(addr) = self.explicit {
            return Ok(addr);
        }
        peer.map(|peer| SocketAddr::new(peer.ip(), self.port))
            .ok_or(TransportError::NoConnectTarget)
    }
}

/// TCP link whose frames are written in order by a dedicated writer task
pub struct OutboundLink {
    target: ReverseTarget,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl OutboundLink {
    pub fn new(target: ReverseTarget) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            target,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    async fn write_frames(
        mut stream: TcpStream,
        addr: SocketAddr,
        mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(frame) = frames.recv().await {
            match stream.write_all(&frame).await {
                Ok(()) => debug!("Sent {} bytes to {}", frame.len(), addr),
                Err(e) => error!("Failed to send {} bytes to {}: {}", frame.len(), addr, e),
            }
        }
    }
}

impl PacketSink for OutboundLink {
    fn send(&self, frame: Vec<u8>) {
        if let Err(e) = self.tx.send(frame) {
            error!("Failed to queue frame for the reverse channel: {}", e);
        }
    }
}

impl Connector for OutboundLink {
    fn connect(&self, lifecycle: Arc<ConnectionLifecycle>) {
        let Some(frames) = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!("Reverse channel connect requested twice, ignoring");
            return;
        };

        let addr = match self.target.resolve(lifecycle.reachable_peer()) {
            Ok(addr) => addr,
            Err(e) => {
                lifecycle.finish_attempt(Err(e));
                return;
            }
        };

        info!("Connecting reverse channel to {}", addr);
        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    lifecycle.finish_attempt(Ok(addr));
                    Self::write_frames(stream, addr, frames).await;
                }
                Err(e) => {
                    lifecycle.finish_attempt(Err(e.into()));
                }
            }
        });
    }
}
