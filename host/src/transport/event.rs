//! Event transport used by controller and headset peers
//!
//! The listener side turns every accepted socket into a stream of
//! [`TransportEvent`]s: `Connect`, one `Data` per received chunk, then
//! `Disconnect`. [`EventChannel`] reassembles frames per connection and
//! produces [`Inbound`] messages for the tick loop.
//!
//! Over TCP a connection is a single reliable ordered channel, so data
//! events carry no channel id.

use super::{ConnectionId, Inbound, Origin};
use crate::error::TransportError;
use log::{debug, error, info, warn};
use shared::{FrameAssembler, SizeOrder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect {
        connection: ConnectionId,
        addr: SocketAddr,
    },
    Data {
        connection: ConnectionId,
        bytes: Vec<u8>,
    },
    Disconnect {
        connection: ConnectionId,
    },
}

pub struct EventListener {
    listener: TcpListener,
    next_connection: ConnectionId,
}

impl EventListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Event transport listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            next_connection: 1,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, spawning one reader task per connection
    pub async fn run(mut self, events: mpsc::UnboundedSender<TransportEvent>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let connection = self.next_connection;
                    self.next_connection = self.next_connection.wrapping_add(1).max(1);

                    if events
                        .send(TransportEvent::Connect { connection, addr })
                        .is_err()
                    {
                        break;
                    }
                    tokio::spawn(Self::read_connection(stream, connection, events.clone()));
                }
                Err(e) => {
                    error!("Error accepting event connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn read_connection(
        mut stream: TcpStream,
        connection: ConnectionId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let mut buffer = [0u8; READ_CHUNK];

        loop {
            match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(len) => {
                    let event = TransportEvent::Data {
                        connection,
                        bytes: buffer[..len].to_vec(),
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Event connection {} read failed: {}", connection, e);
                    break;
                }
            }
        }

        let _ = events.send(TransportEvent::Disconnect { connection });
    }
}

/// Per-connection frame reassembly for the event transport
pub struct EventChannel {
    order: SizeOrder,
    max_frame: usize,
    assemblers: HashMap<ConnectionId, FrameAssembler>,
}

impl EventChannel {
    pub fn new(max_frame: usize) -> Self {
        Self {
            order: SizeOrder::Little,
            max_frame,
            assemblers: HashMap::new(),
        }
    }

    pub fn open_connections(&self) -> usize {
        self.assemblers.len()
    }

    pub fn on_event(&mut self, event: TransportEvent) -> Vec<Inbound> {
        match event {
            TransportEvent::Connect { connection, addr } => {
                self.assemblers.insert(
                    connection,
                    FrameAssembler::with_limit(self.order, self.max_frame),
                );
                vec![Inbound::PeerConnected { connection, addr }]
            }
            TransportEvent::Data { connection, bytes } => {
                let order = self.order;
                let max_frame = self.max_frame;
                let assembler = self
                    .assemblers
                    .entry(connection)
                    .or_insert_with(|| FrameAssembler::with_limit(order, max_frame));

                if assembler.is_poisoned() {
                    debug!(
                        "Discarding {} bytes from connection {} after a framing error",
                        bytes.len(),
                        connection
                    );
                    return Vec::new();
                }

                let bodies = match assembler.push(&bytes) {
                    Ok(bodies) => {
                        debug!(
                            "Connection {}: {} bytes, {} frames, {} pending",
                            connection,
                            bytes.len(),
                            bodies.len(),
                            assembler.pending()
                        );
                        bodies
                    }
                    Err(e) => {
                        error!(
                            "Connection {} sent an unusable frame, ignoring it until disconnect: {}",
                            connection, e.error
                        );
                        e.completed
                    }
                };

                bodies
                    .into_iter()
                    .map(|body| Inbound::Frame {
                        origin: Origin::Event(connection),
                        body,
                    })
                    .collect()
            }
            TransportEvent::Disconnect { connection } => {
                if let Some(assembler) = self.assemblers.remove(&connection) {
                    if assembler.pending() > 0 {
                        warn!(
                            "Connection {} closed with {} bytes of an incomplete frame",
                            connection,
                            assembler.pending()
                        );
                    }
                }
                vec![Inbound::PeerDisconnected { connection }]
            }
        }
    }

    /// Drives the channel until either side of it goes away
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) {
        while let Some(event) = events.recv().await {
            for message in self.on_event(event) {
                if inbound.send(message).is_err() {
                    return;
                }
            }
        }
    }
}
