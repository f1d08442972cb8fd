//! The duplex stream abstraction shared by transports and the split-retry
//! stream, and the dialer used to (re)establish transports.
use core::future::Future;
use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    time::Instant,
};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Buffer size used by the provided [`DuplexConn::read_from`].
const COPY_BUF_LEN: usize = 32 * 1024;

/// A byte stream with independently closable read and write halves.
///
/// All operations take `&self`: one task may call `read` and `close_read`
/// while another calls `write`, `read_from` and `close_write` on the same
/// value.
pub trait DuplexConn: Send + Sync {
    /// Reads some bytes into `buf`, returning how many were read.
    ///
    /// `Ok(0)` means end of stream (or an empty `buf`).
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Writes some bytes from `buf`, returning how many were written.
    fn write(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Writes the whole of `buf`.
    fn write_all(&self, mut buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            while !buf.is_empty() {
                match self.write(buf).await {
                    Ok(0) => return Err(ErrorKind::WriteZero.into()),
                    Ok(n) => buf = &buf[n..],
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }
    }

    /// Copies `reader` into this stream until `reader` reaches EOF,
    /// returning the number of bytes copied.
    fn read_from<R>(&self, reader: &mut R) -> impl Future<Output = io::Result<u64>> + Send
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        async move {
            let mut buf = vec![0u8; COPY_BUF_LEN];
            let mut copied = 0u64;
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => return Ok(copied),
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                self.write_all(&buf[..n]).await?;
                copied += n as u64;
            }
        }
    }

    /// Shuts down the read half. Idempotent.
    fn close_read(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Shuts down the write half. Idempotent.
    fn close_write(&self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A network connection that a [`SplitRetryStream`] can run over.
///
/// [`SplitRetryStream`]: crate::SplitRetryStream
pub trait Transport: DuplexConn + 'static {
    /// Sets an absolute deadline for reads, or clears it with `None`.
    ///
    /// Once the deadline passes, pending and future reads fail with
    /// [`ErrorKind::TimedOut`]. Changing the deadline affects a read that
    /// is already pending.
    fn set_read_deadline(&self, deadline: Option<Instant>);

    /// Shuts down both halves of the connection.
    fn close(&self) -> io::Result<()>;
}

/// Establishes transports to a destination.
pub trait Dialer: Send + Sync + 'static {
    /// The transport produced by this dialer.
    type Conn: Transport;

    /// Connects to `destination`.
    fn dial(&self, destination: SocketAddr) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}
