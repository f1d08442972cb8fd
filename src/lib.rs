//! Splitwire is a duplex TCP stream that defends the first outbound payload
//! of a connection (e.g. a TLS ClientHello) against middleboxes that
//! inspect the first segment and terminate the connection.
//!
//! ## Quick Start
//!
//! Open a [`SplitRetryStream`] and use it like a socket, with one task
//! reading and another writing:
//!
//! ```no_run
//! use std::sync::Arc;
//! use splitwire::SplitRetryStream;
//!
//! # async fn run() -> std::io::Result<()> {
//! let stream = Arc::new(SplitRetryStream::dial("203.0.113.7:443".parse().unwrap()).await?);
//!
//! let writer = stream.clone();
//! tokio::spawn(async move { writer.write(b"first payload").await });
//!
//! let mut buf = [0u8; 1024];
//! let n = stream.read(&mut buf).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Everything written before the first reply is buffered. If the first read
//! fails, or no reply arrives within `1200ms + 2 * rtt` of the last write,
//! the stream redials the destination exactly once and replays the buffered
//! payload as two writes cut at a random offset in `[32, 64]` (capped at
//! half of the payload). The caller only sees the reply from the new
//! connection.
//!
//! ## Components
//!
//! * [`Flag`]: a one-shot signal with non-blocking poll and async wait.
//! * [`estimate_timeout`]: the hello reply timeout from the connect RTT.
//! * [`split_hello`] and [`SplitStrategy`]: where the replayed hello is cut.
//! * [`DuplexConn`], [`Transport`] and [`Dialer`]: the stream abstraction,
//!   and the seams where a different transport can be plugged in.
//! * [`TcpConn`] and [`TcpDialer`]: the TCP transport, behind the default
//!   `tcp` feature.
//!
//! ## Configuration
//!
//! Timeouts, the split range, a deterministic split seed and the
//! provisional copy chunk size are set through [`Config`]. For details,
//! refer to the [`config`] module.
//!
//! [`TcpConn`]: crate::TcpConn
//! [`TcpDialer`]: crate::TcpDialer
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;

mod conn;
mod flag;
mod retrier;
mod split;
mod timeout;

#[cfg(feature = "tcp")]
#[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
mod tcp;

pub use config::Config;
pub use conn::{Dialer, DuplexConn, Transport};
pub use error::Error;
pub use flag::Flag;
pub use retrier::{RetryStats, SplitRetryStream};
pub use split::{MAX_SPLIT, MIN_SPLIT, SplitStrategy, UniformSplit, split_hello};
#[cfg(feature = "tcp")]
pub use tcp::{TcpConn, TcpDialer};
pub use timeout::estimate_timeout;
