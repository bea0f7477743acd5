// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io;

use tracing::{Level, event};

use crate::buffer::DEFAULT_CAPACITY;
use crate::{Error, ErrorKind, Result, StreamBuffer, Transport};

/// Buffered byte count above which a write flushes automatically, unless configured otherwise.
pub const DEFAULT_FLUSH_LIMIT: usize = 256;

/// Buffered writing of bytes and formatted text to a [`Transport`].
///
/// Written data is collected in a growable buffer and handed to the transport when
/// [`flush()`][Self::flush] is called, or automatically once more than the flush limit is
/// buffered. The transport may accept fewer bytes than offered; flushing keeps writing until the
/// buffer is empty.
///
/// The writer does **not** flush when dropped. Any data still buffered at that point is lost, so
/// callers have to flush explicitly.
///
/// # Example
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # {
/// use bufstream::BufferedWriter;
/// use bufstream::testing::FakeTransport;
///
/// let mut writer = BufferedWriter::new(FakeTransport::builder().build());
///
/// writer.write(b"250-example.com\r\n").unwrap();
/// writer.format(format_args!("250 SIZE {}\r\n", 35_882_577)).unwrap();
/// writer.flush().unwrap();
///
/// assert_eq!(writer.get_ref().written(), b"250-example.com\r\n250 SIZE 35882577\r\n");
/// # }
/// ```
#[derive(Debug)]
pub struct BufferedWriter<T> {
    transport: T,
    buffer: StreamBuffer,
    flush_limit: usize,
}

impl<T: Transport> BufferedWriter<T> {
    /// Creates a writer with the default configuration.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    /// Starts building a writer with a custom configuration.
    pub fn builder(transport: T) -> BufferedWriterBuilder<T> {
        BufferedWriterBuilder {
            transport,
            capacity: DEFAULT_CAPACITY,
            flush_limit: DEFAULT_FLUSH_LIMIT,
        }
    }

    /// Buffers `bytes`, flushing if the flush limit is exceeded afterwards.
    ///
    /// Returns the number of bytes accepted, which is always `bytes.len()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the automatic flush fails. The bytes remain buffered in that case.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.buffer.append(bytes);
        self.flush_if_over_limit()?;

        Ok(bytes.len())
    }

    /// Buffers `bytes` and flushes unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails. Unwritten bytes remain buffered in that case.
    pub fn write_and_flush(&mut self, bytes: &[u8]) -> Result<usize> {
        self.buffer.append(bytes);
        self.flush()?;

        Ok(bytes.len())
    }

    /// Formats `args` into the buffer, flushing if the flush limit is exceeded afterwards.
    ///
    /// The text is formatted directly into the free space of the buffer. If it does not fit, the
    /// buffer is grown to the exact size required and the text is formatted once more.
    ///
    /// Returns the length of the formatted text.
    ///
    /// # Errors
    ///
    /// Returns an error if the automatic flush fails. The text remains buffered in that case.
    ///
    /// # Panics
    ///
    /// Panics if a formatting trait implementation returns an error, or if the text no longer fits
    /// after growing the buffer because formatting the same arguments produced a longer text.
    pub fn format(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        let len = self.format_into_buffer(args);
        self.flush_if_over_limit()?;

        Ok(len)
    }

    /// Formats `args` into the buffer and flushes unconditionally.
    ///
    /// Returns the length of the formatted text.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails. Unwritten bytes remain buffered in that case.
    ///
    /// # Panics
    ///
    /// Panics if a formatting trait implementation returns an error, or if the text no longer fits
    /// after growing the buffer because formatting the same arguments produced a longer text.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        let len = self.format_into_buffer(args);
        self.flush()?;

        Ok(len)
    }

    /// Writes all buffered bytes to the transport.
    ///
    /// Issues as many transport writes as needed, since the transport may accept only part of the
    /// data per call. Returns the total number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failed transport write, or if the transport accepts zero
    /// bytes. Everything not yet written remains buffered in order, so the flush can be retried.
    pub fn flush(&mut self) -> Result<usize> {
        let mut total = 0;

        while !self.buffer.is_empty() {
            let pending = self.buffer.full_bytes();

            let count = self.transport.write(self.buffer.data()).map_err(|error| {
                event!(Level::DEBUG, message = "transport write failed", pending, written = total, %error);
                Error::from_transport(error)
            })?;

            event!(Level::TRACE, message = "transport write", pending, count);

            if count == 0 {
                return Err(Error::caused_by(ErrorKind::Io, io::Error::from(io::ErrorKind::WriteZero)));
            }

            self.buffer.consume(count);
            total += count;
        }

        Ok(total)
    }

    /// Sets the buffered byte count above which writes flush automatically.
    ///
    /// A limit of 0 disables automatic flushing.
    pub fn set_flush_limit(&mut self, limit: usize) {
        self.flush_limit = limit;
    }

    /// The buffered byte count above which writes flush automatically, 0 if disabled.
    #[must_use]
    pub fn flush_limit(&self) -> usize {
        self.flush_limit
    }

    /// The bytes buffered but not yet written to the transport.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        self.buffer.data()
    }

    /// The current capacity of the internal buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// References the underlying transport.
    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Mutably references the underlying transport.
    ///
    /// Writing to the transport directly while data is buffered reorders the stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consumes the writer and returns the underlying transport. Buffered bytes are lost.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn flush_if_over_limit(&mut self) -> Result<()> {
        if self.flush_limit > 0 && self.buffer.full_bytes() > self.flush_limit {
            self.flush()?;
        }

        Ok(())
    }

    fn format_into_buffer(&mut self, args: fmt::Arguments<'_>) -> usize {
        let available = self.buffer.tail_bytes();
        let len = format_into(self.buffer.tail_mut(), args);

        if len > available {
            event!(Level::TRACE, message = "formatted text did not fit, growing buffer", len, available);

            self.buffer.reserve(len);
            let retried = format_into(self.buffer.tail_mut(), args);
            assert!(
                retried <= self.buffer.tail_bytes(),
                "formatted text grew from {len} to {retried} bytes when formatted a second time"
            );

            self.buffer.fill(retried);
            return retried;
        }

        self.buffer.fill(len);
        len
    }
}

/// Formats `args` into `target` and returns the length of the complete text.
///
/// If the text is longer than `target`, only a prefix is written but the full length is still
/// reported, so the caller can make room and try again.
fn format_into(target: &mut [u8], args: fmt::Arguments<'_>) -> usize {
    let mut cursor = TailCursor { target, len: 0 };

    fmt::write(&mut cursor, args).expect("a formatting trait implementation returned an error");

    cursor.len
}

struct TailCursor<'a> {
    target: &'a mut [u8],
    len: usize,
}

impl fmt::Write for TailCursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let start = self.len;
        self.len += s.len();

        if let Some(destination) = self.target.get_mut(start..self.len) {
            destination.copy_from_slice(s.as_bytes());
        }

        Ok(())
    }
}

/// Writing through [`io::Write`] follows the conventions of [`std::io::BufWriter`].
///
/// Once bytes are accepted into the buffer, `write` reports them as written even if the automatic
/// flush fails, since an error would make callers such as `write_all` append them a second time.
/// The failure is reported by the next `flush`, which still has the bytes to retry.
impl<T: Transport> io::Write for BufferedWriter<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.append(buf);

        if let Err(error) = self.flush_if_over_limit() {
            event!(
                Level::DEBUG,
                message = "automatic flush failed, deferred to next flush",
                buffered = self.buffer.full_bytes(),
                %error
            );
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Self::flush(self).map(drop).map_err(io::Error::from)
    }
}

/// Creates an instance of [`BufferedWriter`].
///
/// Access through [`BufferedWriter::builder()`].
#[derive(Debug)]
#[must_use]
pub struct BufferedWriterBuilder<T> {
    transport: T,
    capacity: usize,
    flush_limit: usize,
}

impl<T: Transport> BufferedWriterBuilder<T> {
    /// Sets the initial capacity of the buffer. Defaults to [`DEFAULT_CAPACITY`].
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the buffered byte count above which writes flush automatically.
    ///
    /// Defaults to [`DEFAULT_FLUSH_LIMIT`]. A limit of 0 disables automatic flushing.
    pub fn flush_limit(mut self, limit: usize) -> Self {
        self.flush_limit = limit;
        self
    }

    /// Builds the writer.
    pub fn build(self) -> BufferedWriter<T> {
        BufferedWriter {
            transport: self.transport,
            buffer: StreamBuffer::with_capacity(self.capacity),
            flush_limit: self.flush_limit,
        }
    }
}
