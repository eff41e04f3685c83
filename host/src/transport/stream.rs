//! Size-prefixed stream transport used by the head-mounted client

use super::{Inbound, Origin};
use crate::error::TransportError;
use crate::lifecycle::ConnectionLifecycle;
use log::{debug, error, info, warn};
use shared::{SizeOrder, SIZE_PREFIX_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Fills `buf` from the reader, returning how many bytes arrived before EOF
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads one frame body from a size-prefixed stream
///
/// Returns `Ok(None)` when the peer closes cleanly between frames. A close
/// partway through a frame is [`TransportError::ConnectionClosed`]. The
/// declared size is checked against `max_frame` before the body buffer is
/// allocated.
pub async fn read_frame<R>(
    reader: &mut R,
    order: SizeOrder,
    max_frame: usize,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; SIZE_PREFIX_LEN];
    let received = read_full(reader, &mut prefix).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < SIZE_PREFIX_LEN {
        return Err(TransportError::ConnectionClosed {
            expected: SIZE_PREFIX_LEN,
            received,
        });
    }

    let size = order.read(prefix) as usize;
    if size > max_frame {
        return Err(TransportError::FrameTooLarge {
            size,
            limit: max_frame,
        });
    }

    let mut body = vec![0u8; size];
    let received = read_full(reader, &mut body).await?;
    if received < size {
        return Err(TransportError::ConnectionClosed {
            expected: size,
            received,
        });
    }

    Ok(Some(body))
}

pub struct StreamListener {
    listener: TcpListener,
    order: SizeOrder,
    max_frame: usize,
}

impl StreamListener {
    pub async fn bind(
        addr: SocketAddr,
        order: SizeOrder,
        max_frame: usize,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Stream transport listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            order,
            max_frame,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one connection at a time and forwards its frames until it
    /// closes, then re-arms accept
    pub async fn run(
        self,
        inbound: mpsc::UnboundedSender<Inbound>,
        lifecycle: Arc<ConnectionLifecycle>,
    ) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Stream peer connected from {}", addr);
                    lifecycle.mark_peer_reachable(addr);

                    if !self.serve(stream, addr, &inbound).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Error accepting stream connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Returns false once the tick loop has gone away
    async fn serve(
        &self,
        mut stream: TcpStream,
        addr: SocketAddr,
        inbound: &mpsc::UnboundedSender<Inbound>,
    ) -> bool {
        loop {
            match read_frame(&mut stream, self.order, self.max_frame).await {
                Ok(Some(body)) => {
                    debug!("Stream frame of {} bytes from {}", body.len(), addr);
                    let frame = Inbound::Frame {
                        origin: Origin::Stream,
                        body,
                    };
                    if let Err(e) = inbound.send(frame) {
                        warn!("Tick loop gone, dropping stream frame: {}", e);
                        return false;
                    }
                }
                Ok(None) => {
                    info!("Stream peer {} closed the connection", addr);
                    return true;
                }
                Err(e) => {
                    error!("Stream connection from {} failed: {}", addr, e);
                    return true;
                }
            }
        }
    }
}
