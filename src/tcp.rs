use std::{
    future::pending,
    io::{self, ErrorKind},
    net::{Shutdown, SocketAddr},
    time::Instant,
};

use parking_lot::Mutex;
use socket2::SockRef;
use tokio::{net::TcpStream, sync::Notify, time::sleep_until};

use crate::conn::{Dialer, DuplexConn, Transport};

/// A TCP [`Transport`] over a tokio [`TcpStream`].
///
/// Unlike [`TcpStream`] itself, every operation takes `&self`, so a reader
/// task and a writer task can share one connection. Reads honour the
/// deadline set through [`Transport::set_read_deadline`], including when it
/// is moved while a read is pending.
#[derive(Debug)]
pub struct TcpConn {
    stream: TcpStream,
    read_deadline: Mutex<Option<Instant>>,
    deadline_changed: Notify,
}

impl TcpConn {
    /// Wraps a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_deadline: Mutex::new(None),
            deadline_changed: Notify::new(),
        }
    }

    /// Returns the remote address of the connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Returns the local address of the connection.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Returns a reference to the inner stream.
    pub fn inner_stream(&self) -> &TcpStream {
        &self.stream
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match SockRef::from(&self.stream).shutdown(how) {
            // The peer may already have torn the connection down.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

impl From<TcpStream> for TcpConn {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline.into()).await,
        None => pending().await,
    }
}

impl DuplexConn for TcpConn {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let changed = self.deadline_changed.notified();
            let deadline = *self.read_deadline.lock();
            tokio::select! {
                biased;

                ready = self.stream.readable() => {
                    ready?;
                    match self.stream.try_read(buf) {
                        Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                        result => return result,
                    }
                }
                _ = sleep_until_deadline(deadline) => {
                    return Err(io::Error::new(ErrorKind::TimedOut, "read deadline exceeded"));
                }
                _ = changed => continue,
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            self.stream.writable().await?;
            match self.stream.try_write(buf) {
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                result => return result,
            }
        }
    }

    async fn close_read(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Read)
    }

    async fn close_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl Transport for TcpConn {
    fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.read_deadline.lock() = deadline;
        self.deadline_changed.notify_waiters();
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// A [`Dialer`] producing [`TcpConn`]s.
///
/// `TCP_NODELAY` is enabled by default so that the two halves of a replayed
/// hello leave as separate segments instead of being coalesced.
#[derive(Clone, Debug)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    /// Creates a dialer with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Sets whether dialed connections use `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialer for TcpDialer {
    type Conn = TcpConn;

    async fn dial(&self, destination: SocketAddr) -> io::Result<TcpConn> {
        let stream = TcpStream::connect(destination).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(TcpConn::new(stream))
    }
}
