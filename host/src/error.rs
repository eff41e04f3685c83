//! Error taxonomy for the replication core
//!
//! Nothing here is fatal to the process. Codec and registry errors are
//! contained per packet by the dispatcher, transport errors per connection
//! or per send.

use shared::{CodecError, ObjectId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no live object with id {0}")]
    NotFound(ObjectId),

    #[error("object id {0} is already live")]
    IdInUse(ObjectId),

    #[error("scene handle is already registered as object {0}")]
    HandleInUse(ObjectId),

    #[error("scene handle is not registered")]
    UnknownHandle,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { expected: usize, received: usize },

    #[error("declared frame size {size} exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("no reverse-channel target is known")]
    NoConnectTarget,
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("malformed mesh payload: {0}")]
    Malformed(#[from] CodecError),

    #[error("mesh file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("mesh file encoding failed: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Failure to apply one inbound packet
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] CodecError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl DispatchError {
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            DispatchError::Malformed(_) | DispatchError::Mesh(MeshError::Malformed(_))
        )
    }
}
