//! Errors raised by the retry procedure.
//!
use core::{
    error,
    fmt::{Display, Formatter},
};
use std::{io, net::SocketAddr};

/// Enumeration of the failures the retry procedure adds on top of plain
/// transport I/O errors.
///
/// These are surfaced through [`io::Error`], keeping the [`io::ErrorKind`]
/// of the underlying failure. Callers that need to tell a retry failure
/// apart from an ordinary transport error can downcast:
///
/// ```
/// # use std::io;
/// use splitwire::Error;
///
/// fn is_retry_failure(err: &io::Error) -> bool {
///     err.get_ref()
///         .and_then(|e| e.downcast_ref::<Error>())
///         .is_some()
/// }
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The first read failed and the replacement connection could not be
    /// established.
    ///
    /// # Suggested error handling strategy
    ///
    /// This error is fatal. The stream never attempts a second retry, so the
    /// caller should drop it.
    RetryDialFailed {
        /// The destination that was redialed.
        destination: SocketAddr,
        /// The error returned by the dialer.
        source: io::Error,
    },

    /// The replacement connection was established, but replaying the
    /// buffered hello on it failed.
    ///
    /// # Suggested error handling strategy
    ///
    /// This error is fatal. The stream never attempts a second retry, so the
    /// caller should drop it.
    ReplayFailed {
        /// How many hello bytes had been written before the failure.
        replayed: usize,
        /// The error returned by the replacement connection.
        source: io::Error,
    },
}

impl Error {
    fn source_io(&self) -> &io::Error {
        match self {
            Error::RetryDialFailed { source, .. } => source,
            Error::ReplayFailed { source, .. } => source,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::RetryDialFailed {
                destination,
                source,
            } => write!(f, "RetryDialFailed: {}: {}", destination, source),
            Error::ReplayFailed { replayed, source } => {
                write!(f, "ReplayFailed: after {} bytes: {}", replayed, source)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(self.source_io())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(e.source_io().kind(), e)
    }
}

#[cfg(test)]
mod test {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn test_io_error_keeps_kind() {
        let err: io::Error = Error::RetryDialFailed {
            destination: "127.0.0.1:443".parse().unwrap(),
            source: ErrorKind::ConnectionRefused.into(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        match err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            Some(Error::RetryDialFailed { destination, .. }) => {
                assert_eq!(destination.port(), 443)
            }
            other => panic!("unexpected inner error: {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        let err = Error::ReplayFailed {
            replayed: 32,
            source: ErrorKind::BrokenPipe.into(),
        };
        assert!(err.to_string().starts_with("ReplayFailed: after 32 bytes"));
    }
}
