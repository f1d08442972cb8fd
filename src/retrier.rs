use core::{fmt, future::Future};
use std::{
    io::{self, ErrorKind},
    mem,
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::Mutex,
};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

#[cfg(feature = "tcp")]
use crate::tcp::TcpDialer;
use crate::{
    config::Config,
    conn::{Dialer, DuplexConn, Transport},
    error::Error,
    flag::Flag,
    split::{SplitStrategy, split_hello},
};

/// A TCP stream that transparently retries once, splitting the first
/// upstream payload in two, if the connection fails before any reply.
///
/// Some middleboxes inspect the first segment of a connection and kill it
/// when it matches a signature. `SplitRetryStream` buffers everything
/// written before the first byte is received (the "hello"). If the first
/// read fails, or no reply arrives within a timeout derived from the
/// connect round trip, it redials the destination, replays the hello as two
/// writes cut at a random offset, and returns what the new connection
/// reads, as if nothing happened.
///
/// Like a socket, it is meant for two-task use: one task calls [`read`] and
/// [`close_read`], another calls [`write`], [`read_from`] and
/// [`close_write`]. Share it through an [`Arc`].
///
/// State Transition Diagram
/// ```text
///
///        |
///        V
///   Provisional ----(first read succeeds)----> Completed
///        |                                         ^
///        +---(first read fails: redial, replay)----+
///
/// ```
///
/// While provisional, the connection and the hello are guarded by a lock.
/// Completed is entered exactly once; from then on neither changes and both
/// roles use the connection without locking.
///
/// [`read`]: SplitRetryStream::read
/// [`write`]: SplitRetryStream::write
/// [`read_from`]: SplitRetryStream::read_from
/// [`close_read`]: SplitRetryStream::close_read
/// [`close_write`]: SplitRetryStream::close_write
pub struct SplitRetryStream<D: Dialer> {
    dialer: D,
    destination: SocketAddr,
    timeout: Duration,
    read_from_chunk_len: usize,
    state: Mutex<Provisional<D::Conn>>,
    // Filled exactly once, before `retry_decided` closes.
    settled: OnceLock<Arc<D::Conn>>,
    stats: OnceLock<RetryStats>,
    retry_decided: Flag,
    read_closed: Flag,
    write_closed: Flag,
}

/// Everything the lock guards while the retry question is open.
struct Provisional<C> {
    conn: Arc<C>,
    hello: Vec<u8>,
    chunks: usize,
    split: Option<usize>,
    retried: bool,
    splitter: Box<dyn SplitStrategy>,
}

/// What happened while the retry question was open.
///
/// Available through [`SplitRetryStream::retry_stats`] once the question
/// is settled.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RetryStats {
    /// Number of hello bytes buffered before the first read completed.
    pub hello_len: usize,
    /// Number of buffered writes that made up the hello.
    pub chunks: usize,
    /// Length of the first replayed segment, if the hello was replayed.
    pub split: Option<usize>,
    /// Whether a retry was attempted. A retry may be attempted and still
    /// fail, in which case `split` is `None`.
    pub retried: bool,
    /// Time allowed between a buffered write and the first reply.
    pub timeout: Duration,
}

#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
impl SplitRetryStream<TcpDialer> {
    /// Connects to `destination` over TCP with the default [`Config`].
    ///
    /// Returns the connection error, and no stream, if the initial dial
    /// fails.
    pub async fn dial(destination: SocketAddr) -> io::Result<Self> {
        Self::dial_with(TcpDialer::new(), destination, Config::default()).await
    }
}

impl<D: Dialer> SplitRetryStream<D> {
    /// Connects to `destination` through `dialer`.
    ///
    /// The connect latency is measured to derive the hello reply timeout.
    /// For details on `config`, refer to the [`config`] module.
    ///
    /// [`config`]: crate::config
    pub async fn dial_with(dialer: D, destination: SocketAddr, config: Config) -> io::Result<Self> {
        let splitter = Box::new(config.split_strategy());
        Self::dial_with_strategy(dialer, destination, config, splitter).await
    }

    /// Like [`dial_with`], with a caller-supplied split strategy that
    /// replaces the one described by `config`.
    ///
    /// [`dial_with`]: SplitRetryStream::dial_with
    pub async fn dial_with_strategy(
        dialer: D,
        destination: SocketAddr,
        config: Config,
        splitter: Box<dyn SplitStrategy>,
    ) -> io::Result<Self> {
        let before = Instant::now();
        let conn = dialer.dial(destination).await?;
        let after = Instant::now();
        let timeout = config.timeout_for(before, after);
        debug!(%destination, ?timeout, "connected");

        Ok(Self {
            dialer,
            destination,
            timeout,
            read_from_chunk_len: config.read_from_chunk_len,
            state: Mutex::new(Provisional {
                conn: Arc::new(conn),
                hello: Vec::new(),
                chunks: 0,
                split: None,
                retried: false,
                splitter,
            }),
            settled: OnceLock::new(),
            stats: OnceLock::new(),
            retry_decided: Flag::new(),
            read_closed: Flag::new(),
            write_closed: Flag::new(),
        })
    }

    /// Returns the address this stream connects to.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Returns the time allowed between a buffered write and the first
    /// reply before a retry is triggered.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns whether the retry question is settled, i.e. the first read
    /// has completed (with or without a retry).
    pub fn is_retry_decided(&self) -> bool {
        self.retry_decided.is_closed()
    }

    /// Returns what happened before the retry question was settled, or
    /// `None` while it is still open.
    pub fn retry_stats(&self) -> Option<&RetryStats> {
        if self.retry_decided.is_closed() {
            self.stats.get()
        } else {
            None
        }
    }

    /// Returns the final connection once the retry question is settled.
    fn final_conn(&self) -> Option<&Arc<D::Conn>> {
        // `settle` fills the slot before closing `retry_decided` with
        // Release ordering, and `is_closed` loads with Acquire ordering, so
        // a closed flag guarantees the slot and the connection behind it
        // are visible here without taking the lock.
        if self.retry_decided.is_closed() {
            self.settled.get()
        } else {
            None
        }
    }

    async fn current_conn(&self) -> Arc<D::Conn> {
        match self.final_conn() {
            Some(conn) => conn.clone(),
            None => self.state.lock().await.conn.clone(),
        }
    }

    /// Reads some bytes into `buf`.
    ///
    /// The first read that fails while the retry question is open triggers
    /// the retry: the result of the read on the replacement connection
    /// becomes the result of this call. A read that returns `Ok(0)` is
    /// passed through untouched and settles nothing.
    ///
    /// # Errors
    ///
    /// If the retry cannot redial the destination or replay the hello, the
    /// returned [`io::Error`] wraps an [`Error`]. No second retry is ever
    /// attempted.
    ///
    /// # Cancel safety
    ///
    /// If the future is dropped while a retry is in flight, the retry is
    /// abandoned but still counts: the next failing read settles the stream
    /// on whatever connection is current instead of redialing. No data is
    /// lost when the future is dropped before the retry starts.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(conn) = self.final_conn() {
            return conn.read(buf).await;
        }

        // Only the reader replaces the connection, so this one stays
        // current until the retry question is settled below.
        let conn = self.state.lock().await.conn.clone();
        let result = conn.read(buf).await;
        if matches!(result, Ok(0)) {
            // No data and no error does not rule out the need for a retry,
            // unless one was already abandoned on this stream.
            let mut state = self.state.lock().await;
            if state.retried && !self.retry_decided.is_closed() {
                self.settle(&mut state);
            }
            return result;
        }
        if self.retry_decided.is_closed() {
            return result;
        }

        let mut state = self.state.lock().await;
        if self.retry_decided.is_closed() {
            return result;
        }
        let result = match result {
            Ok(n) => {
                // The deadline only guards the hello.
                conn.set_read_deadline(None);
                Ok(n)
            }
            Err(cause) if state.retried => {
                // An earlier read was cancelled partway through the retry.
                debug!(error = %cause, "read failed after an abandoned retry");
                Err(cause)
            }
            Err(cause) => self.retry(&mut state, buf, cause).await,
        };
        self.settle(&mut state);
        result
    }

    async fn retry(
        &self,
        state: &mut Provisional<D::Conn>,
        buf: &mut [u8],
        cause: io::Error,
    ) -> io::Result<usize> {
        info!(
            destination = %self.destination,
            hello_len = state.hello.len(),
            error = %cause,
            "first read failed, retrying with split hello"
        );
        state.retried = true;
        if let Err(e) = state.conn.close() {
            debug!(error = %e, "closing provisional connection failed");
        }

        let conn = match self.dialer.dial(self.destination).await {
            Ok(conn) => Arc::new(conn),
            Err(source) => {
                warn!(destination = %self.destination, error = %source, "retry dial failed");
                return Err(Error::RetryDialFailed {
                    destination: self.destination,
                    source,
                }
                .into());
            }
        };
        state.conn = conn.clone();

        let (first, second) = split_hello(&state.hello, state.splitter.as_mut());
        state.split = Some(first.len());
        debug!(split = first.len(), hello_len = state.hello.len(), "replaying hello");
        if let Err(source) = conn.write_all(first).await {
            warn!(error = %source, "hello replay failed");
            return Err(Error::ReplayFailed { replayed: 0, source }.into());
        }
        if let Err(source) = conn.write_all(second).await {
            warn!(error = %source, "hello replay failed");
            return Err(Error::ReplayFailed {
                replayed: first.len(),
                source,
            }
            .into());
        }

        // The caller may have closed a half on the old connection while the
        // new one was being set up. Half-closing is idempotent, so this is
        // safe even if the request actually landed on the new connection.
        if self.read_closed.is_closed() {
            conn.close_read().await?;
        }
        if self.write_closed.is_closed() {
            conn.close_write().await?;
        }

        conn.read(buf).await
    }

    /// Ends the provisional phase. Must be called with the lock held, once.
    fn settle(&self, state: &mut Provisional<D::Conn>) {
        let mut hello = mem::take(&mut state.hello);
        let _ = self.stats.set(RetryStats {
            hello_len: hello.len(),
            chunks: state.chunks,
            split: state.split,
            retried: state.retried,
            timeout: self.timeout,
        });
        hello.zeroize();

        let _ = self.settled.set(state.conn.clone());
        self.retry_decided.close();
        debug!(destination = %self.destination, retried = state.retried, "retry decided");
    }

    /// Writes some bytes from `buf`, returning how many were written.
    ///
    /// While the retry question is open, written bytes are also buffered
    /// for replay and the read deadline is re-armed. If the write fails in
    /// that phase, this call waits for the reader to settle the retry and
    /// then writes `buf` to the final connection. An empty `buf` is a no-op
    /// in every phase.
    ///
    /// # Cancel safety
    ///
    /// Cancel safe as long as the transport's `write` is: bytes accepted by
    /// the connection are buffered in the same poll that reports them, so a
    /// dropped future never leaves written bytes out of the replay.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(conn) = self.final_conn() {
            return conn.write(buf).await;
        }

        let mut state = self.state.lock().await;
        // Double-checked: the reader may have settled the retry question
        // while this call was waiting for the lock.
        if self.retry_decided.is_closed() {
            let conn = state.conn.clone();
            drop(state);
            return conn.write(buf).await;
        }
        let conn = state.conn.clone();
        let result = conn.write(buf).await;
        if let Ok(n) = result {
            state.hello.extend_from_slice(&buf[..n]);
            state.chunks += 1;
        }
        // A reply or another write is required within the timeout.
        conn.set_read_deadline(Instant::now().checked_add(self.timeout));
        drop(state);

        match result {
            Ok(n) => Ok(n),
            Err(e) => {
                debug!(error = %e, "write on provisional connection failed, waiting for retry");
                // The reader resolves the retry. The final connection has
                // already replayed everything buffered before this call.
                self.retry_decided.wait().await;
                self.current_conn().await.write(buf).await
            }
        }
    }

    /// Copies `reader` into this stream until `reader` reaches EOF,
    /// returning the number of bytes copied.
    ///
    /// While the retry question is open, data is pulled in bounded chunks
    /// and pushed through [`write`] so it is buffered for replay. Once the
    /// question is settled, the rest of the copy is delegated to the final
    /// connection.
    ///
    /// [`write`]: SplitRetryStream::write
    pub async fn read_from<R>(&self, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut copied = 0u64;
        if !self.retry_decided.is_closed() {
            let mut chunk = vec![0u8; self.read_from_chunk_len];
            while !self.retry_decided.is_closed() {
                let n = match reader.read(&mut chunk).await {
                    Ok(0) => return Ok(copied),
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                let mut pending = &chunk[..n];
                while !pending.is_empty() {
                    let written = self.write(pending).await?;
                    if written == 0 {
                        return Err(ErrorKind::WriteZero.into());
                    }
                    pending = &pending[written..];
                    copied += written as u64;
                }
            }
        }

        let conn = self.current_conn().await;
        Ok(copied + conn.read_from(reader).await?)
    }

    /// Shuts down the read half. Idempotent.
    ///
    /// Safe to call while a retry is in flight: the request is carried over
    /// to the replacement connection.
    pub async fn close_read(&self) -> io::Result<()> {
        self.read_closed.close();
        let state = self.state.lock().await;
        state.conn.close_read().await
    }

    /// Shuts down the write half. Idempotent.
    ///
    /// Safe to call while a retry is in flight: the request is carried over
    /// to the replacement connection.
    pub async fn close_write(&self) -> io::Result<()> {
        self.write_closed.close();
        let state = self.state.lock().await;
        state.conn.close_write().await
    }
}

impl<D: Dialer> DuplexConn for SplitRetryStream<D> {
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        Self::read(self, buf)
    }

    fn write(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        Self::write(self, buf)
    }

    fn read_from<R>(&self, reader: &mut R) -> impl Future<Output = io::Result<u64>> + Send
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        Self::read_from(self, reader)
    }

    fn close_read(&self) -> impl Future<Output = io::Result<()>> + Send {
        Self::close_read(self)
    }

    fn close_write(&self) -> impl Future<Output = io::Result<()>> + Send {
        Self::close_write(self)
    }
}

impl<D: Dialer> fmt::Debug for SplitRetryStream<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitRetryStream")
            .field("destination", &self.destination)
            .field("timeout", &self.timeout)
            .field("retry_decided", &self.retry_decided.is_closed())
            .field("read_closed", &self.read_closed.is_closed())
            .field("write_closed", &self.write_closed.is_closed())
            .finish_non_exhaustive()
    }
}
