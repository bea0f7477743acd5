// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io;

/// An error signaled by a buffered read, write or flush operation.
///
/// The [`kind()`][Error::kind] tells the caller why the operation stopped. When the failure came
/// from the underlying transport, the original [`std::io::Error`] is attached as the cause.
///
/// Bytes delivered by the transport before the failure are never lost: they remain buffered and
/// are served by the next read operation. Likewise, bytes that a failed flush did not manage to
/// write remain buffered in their original order.
#[ohno::error]
#[display("stream operation failed: {kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// The reason the operation failed.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether the transport gave up waiting for data within the timeout of the call.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Whether a blocking transport call was interrupted before it completed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.kind == ErrorKind::Interrupted
    }

    /// Translates a failure reported by a [`Transport`][crate::Transport] into an [`Error`].
    pub(crate) fn from_transport(error: io::Error) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            _ => ErrorKind::Io,
        };

        Self::caused_by(kind, error)
    }
}

/// Why a buffered stream operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport did not deliver any data before the timeout of the call elapsed.
    Timeout,

    /// The blocking transport call was interrupted, typically by another thread asking the
    /// transport to give up on the pending operation.
    Interrupted,

    /// The transport failed with a hard I/O error.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Timeout => "timed out",
            Self::Interrupted => "interrupted",
            Self::Io => "transport I/O error",
        };

        f.write_str(text)
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match error.kind() {
            ErrorKind::Timeout => io::ErrorKind::TimedOut,
            ErrorKind::Interrupted => io::ErrorKind::Interrupted,
            ErrorKind::Io => io::ErrorKind::Other,
        };

        Self::new(kind, error)
    }
}

/// A `Result` that may contain an [`Error`] from this crate.
pub type Result<T> = std::result::Result<T, Error>;
