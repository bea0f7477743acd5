// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{Level, event};

/// An unbuffered byte transport that the buffered reader and writer operate on.
///
/// This is the small capability surface a socket, serial channel or pipe has to offer: a blocking
/// read, a read bounded by a timeout and a blocking write. Each call performs at most one
/// underlying I/O operation and may transfer fewer bytes than requested.
///
/// # Outcomes
///
/// * `Ok(n)` with `n > 0` - `n` bytes were transferred.
/// * `Ok(0)` from a read - the stream has ended.
/// * `Err` of kind [`TimedOut`][io::ErrorKind::TimedOut] or
///   [`WouldBlock`][io::ErrorKind::WouldBlock] - the timeout elapsed before any data arrived.
/// * `Err` of kind [`Interrupted`][io::ErrorKind::Interrupted] - the call was interrupted, e.g. by
///   another thread signaling the transport to abandon a blocking read.
/// * Any other `Err` - a hard I/O failure.
///
/// The buffered reader and writer never retry a failed call; every outcome is handed to their
/// caller.
///
/// # Ownership
///
/// The trait is implemented for `&mut T` so a reader or writer can borrow a transport owned by the
/// caller. The socket adapters are also implemented for shared references, allowing one
/// [`BufferedReader`][crate::BufferedReader] and one [`BufferedWriter`][crate::BufferedWriter] to
/// operate on the same socket.
pub trait Transport {
    /// Reads at most `buf.len()` bytes, blocking until at least one byte is available or the
    /// stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or the call is interrupted.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads at most `buf.len()` bytes, blocking for no longer than `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`TimedOut`][io::ErrorKind::TimedOut] or
    /// [`WouldBlock`][io::ErrorKind::WouldBlock] if no data arrived in time, or any other error
    /// if the transport fails or the call is interrupted.
    fn timeout_read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Writes at most `buf.len()` bytes, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or the call is interrupted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn timeout_read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).timeout_read(buf, timeout)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

/// Socket types whose read timeout can be inspected and adjusted through a shared reference.
trait ReadTimeout {
    fn read_timeout(&self) -> io::Result<Option<Duration>>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ReadTimeout for TcpStream {
    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        Self::read_timeout(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        Self::set_read_timeout(self, timeout)
    }
}

#[cfg(unix)]
impl ReadTimeout for std::os::unix::net::UnixStream {
    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        Self::read_timeout(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        Self::set_read_timeout(self, timeout)
    }
}

/// Performs one read with the socket's read timeout temporarily set to `timeout`.
///
/// The read timeout the socket had before the call is restored afterwards. The outcome of the
/// read always wins over a failure to restore it, so bytes taken off the socket are never dropped.
fn read_with_timeout<S>(socket: &S, mut reader: impl Read, buf: &mut [u8], timeout: Duration) -> io::Result<usize>
where
    S: ReadTimeout + ?Sized,
{
    // A zero timeout is rejected by the socket API, the shortest expressible wait is used instead.
    let timeout = timeout.max(Duration::from_millis(1));

    let previous = socket.read_timeout()?;
    socket.set_read_timeout(Some(timeout))?;

    let result = reader.read(buf);

    if let Err(error) = socket.set_read_timeout(previous) {
        event!(Level::DEBUG, message = "restoring socket read timeout failed", ?previous, %error);
    }

    result
}

macro_rules! socket_transport {
    ($socket:ty) => {
        impl Transport for $socket {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                Read::read(self, buf)
            }

            fn timeout_read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
                read_with_timeout(&*self, &*self, buf, timeout)
            }

            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Write::write(self, buf)
            }
        }

        impl Transport for &$socket {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                Read::read(self, buf)
            }

            fn timeout_read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
                read_with_timeout(*self, *self, buf, timeout)
            }

            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Write::write(self, buf)
            }
        }
    };
}

socket_transport!(TcpStream);

#[cfg(unix)]
socket_transport!(std::os::unix::net::UnixStream);
