//! Reassembly of size-prefixed frames from arbitrarily split chunks

use crate::{CodecError, SizeOrder, DEFAULT_MAX_FRAME_SIZE, SIZE_PREFIX_LEN};
use thiserror::Error;

/// A framing error, with the frames completed before it in the same chunk
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error} after {} complete frames", completed.len())]
pub struct FramingError {
    pub completed: Vec<Vec<u8>>,
    #[source]
    pub error: CodecError,
}

/// Accumulates received chunks and yields complete frame bodies
///
/// A frame may arrive whole, split across several receive events, or
/// concatenated with the next frame in one chunk. Bodies come out in the
/// order their bytes were pushed.
///
/// Once a declared size exceeds the limit the byte stream has no usable
/// frame boundary left, so the assembler is poisoned and discards every
/// later chunk until [`FrameAssembler::clear`].
#[derive(Debug)]
pub struct FrameAssembler {
    order: SizeOrder,
    max_frame: usize,
    buffer: Vec<u8>,
    poisoned: bool,
}

impl FrameAssembler {
    pub fn new(order: SizeOrder) -> Self {
        Self::with_limit(order, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_limit(order: SizeOrder, max_frame: usize) -> Self {
        Self {
            order,
            max_frame,
            buffer: Vec::new(),
            poisoned: false,
        }
    }

    /// Appends a chunk and returns every frame body it completed
    ///
    /// On an oversized declaration the error carries the bodies completed
    /// ahead of it; the rest of the chunk and everything after is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        if self.poisoned {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(chunk);

        let mut bodies = Vec::new();
        let mut consumed = 0;

        loop {
            let pending = &self.buffer[consumed..];
            if pending.len() < SIZE_PREFIX_LEN {
                break;
            }

            let size =
                self.order
                    .read([pending[0], pending[1], pending[2], pending[3]]) as usize;
            if size > self.max_frame {
                self.buffer.clear();
                self.poisoned = true;
                return Err(FramingError {
                    completed: bodies,
                    error: CodecError::FrameTooLarge {
                        size,
                        limit: self.max_frame,
                    },
                });
            }

            let total = SIZE_PREFIX_LEN + size;
            if pending.len() < total {
                break;
            }

            bodies.push(pending[SIZE_PREFIX_LEN..total].to_vec());
            consumed += total;
        }

        self.buffer.drain(..consumed);
        Ok(bodies)
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Drops buffered bytes and accepts input again
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.poisoned = false;
    }
}
