//! Inbound and outbound transports
//!
//! Network tasks never touch the scene. They turn socket traffic into
//! [`Inbound`] messages and send them to the tick loop over an unbounded
//! channel.

pub mod event;
pub mod outbound;
pub mod stream;

use std::net::SocketAddr;

pub use event::{EventChannel, EventListener, TransportEvent};
pub use outbound::{Connector, OutboundLink, PacketSink, ReverseTarget};
pub use stream::{read_frame, StreamListener};

/// Identifies one connection on the event transport
pub type ConnectionId = u32;

/// Which transport a frame arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Stream,
    Event(ConnectionId),
}

/// Messages sent from network tasks to the tick loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete frame body (flag + payload)
    Frame { origin: Origin, body: Vec<u8> },
    PeerConnected {
        connection: ConnectionId,
        addr: SocketAddr,
    },
    PeerDisconnected { connection: ConnectionId },
}
