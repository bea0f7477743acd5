// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZero;
use std::time::Duration;

use tracing::{Level, event};

use crate::buffer::DEFAULT_CAPACITY;
use crate::{Error, Result, StreamBuffer, Transport};

/// How many bytes are requested from the transport when the buffer has no tail-room left.
pub const DEFAULT_READ_AHEAD: NonZero<usize> = NonZero::new(256).expect("256 is not zero");

/// The result of a successful read operation on a [`BufferedReader`].
///
/// The byte slices borrow the reader's buffer and have to be copied or processed before the next
/// call into the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome<'a> {
    /// The request was satisfied. The bytes have been consumed from the buffer.
    Data(&'a [u8]),

    /// The stream ended before the request could be satisfied.
    ///
    /// The slice holds everything that is still buffered. These bytes have **not** been consumed
    /// and will be returned by the next read, e.g. via
    /// [`read_some_bytes()`][BufferedReader::read_some_bytes].
    Short(&'a [u8]),

    /// The stream ended and no bytes are buffered.
    Eof,
}

impl<'a> ReadOutcome<'a> {
    /// The bytes of a satisfied request, or `None` for short reads and end of stream.
    #[must_use]
    pub fn data(self) -> Option<&'a [u8]> {
        match self {
            Self::Data(bytes) => Some(bytes),
            Self::Short(_) | Self::Eof => None,
        }
    }

    /// Whether the stream ended before the request was satisfied.
    #[must_use]
    pub fn is_end_of_stream(self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Buffered reading of lines, fixed-size blocks and chunks from a [`Transport`].
///
/// The reader accumulates data from the transport into a growable buffer and serves requests from
/// there, so that a line-oriented protocol does not need a system call per byte and fixed-size
/// records can be read regardless of how the transport fragments them.
///
/// # Timeouts
///
/// Every read operation accepts an optional timeout. `None` blocks until the transport delivers
/// data. With `Some(timeout)` every individual transport call is bounded by `timeout`; an
/// operation that needs several transport calls (e.g. a long line trickling in) may therefore
/// take longer than `timeout` in total.
///
/// # Failures
///
/// Timeouts, interruptions and transport errors are returned as [`Error`] without retrying. Bytes
/// that arrived before the failure stay buffered and are served by the next call.
///
/// # End of stream
///
/// Once the transport reports the end of the stream, the reader never calls it again. Buffered
/// bytes are still served; afterwards every read reports [`ReadOutcome::Eof`] immediately.
///
/// # Example
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # {
/// use bufstream::testing::FakeTransport;
/// use bufstream::{BufferedReader, ReadOutcome};
///
/// let transport = FakeTransport::builder().data(b"HELO example.com\r\n").build();
/// let mut reader = BufferedReader::new(transport);
///
/// let line = reader.read_line(b"\r\n", None).unwrap();
/// assert_eq!(line, ReadOutcome::Data(b"HELO example.com\r\n"));
///
/// assert_eq!(reader.read_line(b"\r\n", None).unwrap(), ReadOutcome::Eof);
/// # }
/// ```
#[derive(Debug)]
pub struct BufferedReader<T> {
    transport: T,
    buffer: StreamBuffer,
    read_ahead: NonZero<usize>,
    seen_eof: bool,
}

impl<T: Transport> BufferedReader<T> {
    /// Creates a reader with the default configuration.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    /// Starts building a reader with a custom configuration.
    pub fn builder(transport: T) -> BufferedReaderBuilder<T> {
        BufferedReaderBuilder {
            transport,
            capacity: DEFAULT_CAPACITY,
            read_ahead: DEFAULT_READ_AHEAD,
        }
    }

    /// Reads a line terminated by `delimiter`.
    ///
    /// Returns [`ReadOutcome::Data`] with the line, including the delimiter. If the stream ends
    /// before a delimiter arrives, returns [`ReadOutcome::Short`] with the unterminated remainder
    /// (which stays buffered), or [`ReadOutcome::Eof`] if nothing is buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport times out, is interrupted or fails.
    ///
    /// # Panics
    ///
    /// Panics if `delimiter` is empty.
    pub fn read_line(&mut self, delimiter: &[u8], timeout: Option<Duration>) -> Result<ReadOutcome<'_>> {
        assert!(!delimiter.is_empty(), "line delimiter must not be empty");

        // Positions before this offset are known not to start a delimiter.
        let mut scanned = 0;

        loop {
            match find_delimiter(self.buffer.data(), delimiter, scanned) {
                Ok(end) => return Ok(ReadOutcome::Data(self.buffer.take(end))),
                Err(next_scan) => scanned = next_scan,
            }

            if self.fill(0, timeout)? == 0 {
                return Ok(self.end_of_stream());
            }
        }
    }

    /// Reads exactly `len` bytes.
    ///
    /// Returns [`ReadOutcome::Data`] with `len` bytes. If the stream ends first, returns
    /// [`ReadOutcome::Short`] with the bytes buffered so far (which stay buffered), or
    /// [`ReadOutcome::Eof`] if nothing is buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport times out, is interrupted or fails.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn read_bytes(&mut self, len: usize, timeout: Option<Duration>) -> Result<ReadOutcome<'_>> {
        assert_ne!(len, 0, "reading zero bytes is not a meaningful request");

        while self.buffer.full_bytes() < len {
            if self.fill(len, timeout)? == 0 {
                return Ok(self.end_of_stream());
            }
        }

        Ok(ReadOutcome::Data(self.buffer.take(len)))
    }

    /// Reads whatever is available.
    ///
    /// If bytes are buffered, all of them are returned without calling the transport. Otherwise a
    /// single transport read is issued and whatever it delivered is returned, or
    /// [`ReadOutcome::Eof`] if the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport times out, is interrupted or fails.
    pub fn read_some_bytes(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome<'_>> {
        if self.buffer.is_empty() && self.fill(0, timeout)? == 0 {
            return Ok(ReadOutcome::Eof);
        }

        let available = self.buffer.full_bytes();
        Ok(ReadOutcome::Data(self.buffer.take(available)))
    }

    /// Reads a single byte, or `None` if the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport times out, is interrupted or fails.
    pub fn get_char(&mut self, timeout: Option<Duration>) -> Result<Option<u8>> {
        if self.buffer.is_empty() && self.fill(0, timeout)? == 0 {
            return Ok(None);
        }

        Ok(self.buffer.take(1).first().copied())
    }

    /// Whether the stream has ended and every buffered byte has been read.
    #[must_use]
    pub fn eof(&self) -> bool {
        self.seen_eof && self.buffer.is_empty()
    }

    /// The bytes buffered but not yet read, without consuming them.
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
    /// Reading from the transport directly bypasses the buffer and reorders the stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consumes the reader and returns the underlying transport. Buffered bytes are lost.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Issues one transport read to grow the buffered data.
    ///
    /// With `min > 0`, reads at most the bytes missing for `min` to be buffered. With `min == 0`,
    /// reads as much as the tail-room allows, reserving read-ahead space if there is none.
    ///
    /// Returns the number of bytes read, 0 meaning the stream has ended.
    fn fill(&mut self, min: usize, timeout: Option<Duration>) -> Result<usize> {
        if self.seen_eof {
            return Ok(0);
        }

        let to_read = if min == 0 {
            match self.buffer.tail_bytes() {
                0 => self.read_ahead.get(),
                tail_bytes => tail_bytes,
            }
        } else {
            min.saturating_sub(self.buffer.full_bytes())
        };

        debug_assert_ne!(to_read, 0, "callers only fill when more data is needed");

        self.buffer.reserve(to_read);
        let target = &mut self.buffer.tail_mut()[..to_read];

        let result = match timeout {
            Some(timeout) => self.transport.timeout_read(target, timeout),
            None => self.transport.read(target),
        };

        let count = result.map_err(|error| {
            event!(Level::DEBUG, message = "transport read failed", requested = to_read, ?timeout, %error);
            Error::from_transport(error)
        })?;

        event!(Level::TRACE, message = "transport read", requested = to_read, count, ?timeout);

        if count == 0 {
            event!(Level::DEBUG, message = "end of stream", buffered = self.buffer.full_bytes());
            self.seen_eof = true;
        }

        self.buffer.fill(count);
        Ok(count)
    }

    fn end_of_stream(&self) -> ReadOutcome<'_> {
        if self.buffer.is_empty() {
            ReadOutcome::Eof
        } else {
            ReadOutcome::Short(self.buffer.data())
        }
    }
}

/// Finds the first occurrence of `delimiter` in `data`, starting the search at `from`.
///
/// Returns the offset just past the delimiter, or the offset from which a later search has to
/// resume once more data has been appended.
fn find_delimiter(data: &[u8], delimiter: &[u8], from: usize) -> std::result::Result<usize, usize> {
    let resume_at = data.len().saturating_sub(delimiter.len() - 1);

    data.get(from..)
        .and_then(|window| window.windows(delimiter.len()).position(|candidate| candidate == delimiter))
        .map(|offset| from + offset + delimiter.len())
        .ok_or_else(|| resume_at.max(from))
}

/// Creates an instance of [`BufferedReader`].
///
/// Access through [`BufferedReader::builder()`].
#[derive(Debug)]
#[must_use]
pub struct BufferedReaderBuilder<T> {
    transport: T,
    capacity: usize,
    read_ahead: NonZero<usize>,
}

impl<T: Transport> BufferedReaderBuilder<T> {
    /// Sets the initial capacity of the buffer. Defaults to [`DEFAULT_CAPACITY`].
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how many bytes to request from the transport when the buffer is full and more data
    /// is needed. Defaults to [`DEFAULT_READ_AHEAD`].
    pub fn read_ahead(mut self, read_ahead: NonZero<usize>) -> Self {
        self.read_ahead = read_ahead;
        self
    }

    /// Builds the reader.
    pub fn build(self) -> BufferedReader<T> {
        BufferedReader {
            transport: self.transport,
            buffer: StreamBuffer::with_capacity(self.capacity),
            read_ahead: self.read_ahead,
            seen_eof: false,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;

    use new_zealand::nz;
    use tracing_test::traced_test;

    use super::*;
    use crate::ErrorKind;
    use crate::testing::FakeTransport;

    const PAYLOAD: &[u8] = b"MAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n\r\nlast line without end";

    fn split_lines<'a>(payload: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
        let mut lines = Vec::new();
        let mut start = 0;

        while let Ok(end) = find_delimiter(&payload[start..], delimiter, 0) {
            lines.push(&payload[start..start + end]);
            start += end;
        }

        lines
    }

    #[test]
    fn find_delimiter_reports_resume_point() {
        assert_eq!(find_delimiter(b"abc\r\ndef", b"\r\n", 0), Ok(5));
        assert_eq!(find_delimiter(b"abc\r", b"\r\n", 0), Err(3));
        assert_eq!(find_delimiter(b"abc", b"\n", 0), Err(3));
        assert_eq!(find_delimiter(b"", b"\r\n", 0), Err(0));
        assert_eq!(find_delimiter(b"a\nb\n", b"\n", 2), Ok(4));
    }

    #[test]
    fn read_line_across_fragments() {
        let transport = FakeTransport::builder().data(b"abc").data(b"def\n").eof().build();
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Data(b"abcdef\n"));
        assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Eof);
        assert!(reader.eof());
    }

    #[test]
    fn read_line_bytewise_matches_single_shot_split() {
        for delimiter in [b"\n".as_slice(), b"\r\n".as_slice()] {
            let transport = FakeTransport::builder().data_bytewise(PAYLOAD).build();
            let mut reader = BufferedReader::builder(transport).capacity(4).build();

            let mut lines = Vec::new();
            while let ReadOutcome::Data(line) = reader.read_line(delimiter, None).unwrap() {
                lines.push(line.to_vec());
            }

            assert_eq!(lines, split_lines(PAYLOAD, delimiter));
        }
    }

    #[test]
    fn read_line_finds_delimiter_straddling_reads() {
        let transport = FakeTransport::builder().data(b"QUIT\r").data(b"\nNOOP\r\n").build();
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.read_line(b"\r\n", None).unwrap(), ReadOutcome::Data(b"QUIT\r\n"));
        assert_eq!(reader.read_line(b"\r\n", None).unwrap(), ReadOutcome::Data(b"NOOP\r\n"));
    }

    #[test]
    fn read_line_grows_buffer_for_long_lines() {
        let mut line = vec![b'x'; 5000];
        line.push(b'\n');

        let transport = FakeTransport::new(&line);
        let mut reader = BufferedReader::builder(transport).capacity(16).read_ahead(nz!(64)).build();

        assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Data(line.as_slice()));
        assert!(reader.capacity() >= line.len());
    }

    #[test]
    fn read_line_unterminated_remainder_is_short_and_kept() {
        let transport = FakeTransport::new(b"partial");
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Short(b"partial"));
        assert!(!reader.eof());

        assert_eq!(reader.read_some_bytes(None).unwrap(), ReadOutcome::Data(b"partial"));
        assert!(reader.eof());
    }

    #[test]
    fn read_line_after_eof_never_touches_transport() {
        let transport = FakeTransport::builder().eof().build();
        let mut reader = BufferedReader::new(transport);

        for _ in 0..3 {
            assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Eof);
        }

        assert_eq!(reader.get_ref().read_calls(), 1);
    }

    #[test]
    fn read_line_timeout_keeps_partial_data() {
        let transport = FakeTransport::builder().data(b"EHLO ").timeout().data(b"host\n").build();
        let mut reader = BufferedReader::new(transport);
        let timeout = Some(Duration::from_millis(50));

        let error = reader.read_line(b"\n", timeout).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(reader.buffered(), b"EHLO ");

        assert_eq!(reader.read_line(b"\n", timeout).unwrap(), ReadOutcome::Data(b"EHLO host\n"));

        // The same timeout is applied to each transport call.
        assert_eq!(reader.get_ref().timeout_read_calls(), 3);
        assert_eq!(reader.get_ref().last_timeout(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn read_line_interrupted_is_passed_through() {
        let transport = FakeTransport::builder().data(b"ab").interrupted().data(b"\n").build();
        let mut reader = BufferedReader::new(transport);

        let error = reader.read_line(b"\n", None).unwrap_err();
        assert!(error.is_interrupted());

        assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Data(b"ab\n"));
    }

    #[test]
    fn read_line_hard_error_is_passed_through() {
        let transport = FakeTransport::builder()
            .data(b"ab")
            .error(io::ErrorKind::ConnectionReset)
            .build();
        let mut reader = BufferedReader::new(transport);

        let error = reader.read_line(b"\n", None).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Io);
        assert_eq!(reader.buffered(), b"ab");
    }

    #[test]
    #[should_panic]
    fn read_line_empty_delimiter_panics() {
        let mut reader = BufferedReader::new(FakeTransport::new(b"abc"));
        _ = reader.read_line(b"", None);
    }

    #[test]
    fn read_bytes_accumulates_fragments() {
        let transport = FakeTransport::builder().data(b"12").data(b"345").data(b"6789").build();
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.read_bytes(5, None).unwrap(), ReadOutcome::Data(b"12345"));
        assert_eq!(reader.read_bytes(4, None).unwrap(), ReadOutcome::Data(b"6789"));
        assert_eq!(reader.read_bytes(1, None).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn read_bytes_never_requests_more_than_missing() {
        let transport = FakeTransport::new(b"0123456789");
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.read_bytes(4, None).unwrap(), ReadOutcome::Data(b"0123"));
        assert_eq!(reader.buffered(), b"");

        assert_eq!(reader.read_bytes(6, None).unwrap(), ReadOutcome::Data(b"456789"));
    }

    #[test]
    fn read_bytes_served_from_buffer_without_transport_call() {
        let transport = FakeTransport::new(b"line\nrest");
        let mut reader = BufferedReader::new(transport);

        reader.read_line(b"\n", None).unwrap();
        let calls = reader.get_ref().read_calls();

        assert_eq!(reader.read_bytes(4, None).unwrap(), ReadOutcome::Data(b"rest"));
        assert_eq!(reader.get_ref().read_calls(), calls);
    }

    #[test]
    fn eof_then_drain() {
        let transport = FakeTransport::builder().data(b"abc").eof().build();
        let mut reader = BufferedReader::new(transport);

        let outcome = reader.read_bytes(5, None).unwrap();
        assert_eq!(outcome, ReadOutcome::Short(b"abc"));
        assert!(outcome.is_end_of_stream());
        assert_eq!(outcome.data(), None);

        assert_eq!(reader.read_some_bytes(None).unwrap(), ReadOutcome::Data(b"abc"));
        assert_eq!(reader.read_some_bytes(None).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn short_read_bytes_can_be_drained_bytewise() {
        let transport = FakeTransport::new(b"xy");
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.read_bytes(3, None).unwrap(), ReadOutcome::Short(b"xy"));
        assert_eq!(reader.get_char(None).unwrap(), Some(b'x'));
        assert_eq!(reader.get_char(None).unwrap(), Some(b'y'));
        assert_eq!(reader.get_char(None).unwrap(), None);
    }

    #[test]
    #[should_panic]
    fn read_bytes_zero_panics() {
        let mut reader = BufferedReader::new(FakeTransport::new(b"abc"));
        _ = reader.read_bytes(0, None);
    }

    #[test]
    fn read_some_bytes_returns_buffered_without_transport_call() {
        let transport = FakeTransport::builder().data(b"first\nsecond").data(b"more").build();
        let mut reader = BufferedReader::new(transport);

        reader.read_line(b"\n", None).unwrap();
        assert_eq!(reader.get_ref().read_calls(), 1);

        assert_eq!(reader.read_some_bytes(None).unwrap(), ReadOutcome::Data(b"second"));
        assert_eq!(reader.get_ref().read_calls(), 1);

        assert_eq!(reader.read_some_bytes(None).unwrap(), ReadOutcome::Data(b"more"));
        assert_eq!(reader.get_ref().read_calls(), 2);
    }

    #[test]
    fn read_some_bytes_issues_single_read() {
        let transport = FakeTransport::builder().timeout().data(b"late").build();
        let mut reader = BufferedReader::new(transport);

        let error = reader.read_some_bytes(Some(Duration::from_millis(1))).unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(reader.get_ref().read_calls(), 1);

        assert_eq!(reader.read_some_bytes(None).unwrap(), ReadOutcome::Data(b"late"));
    }

    #[test]
    fn get_char_reads_one_byte_at_a_time() {
        let transport = FakeTransport::new(b"ok");
        let mut reader = BufferedReader::new(transport);

        assert_eq!(reader.get_char(None).unwrap(), Some(b'o'));
        assert_eq!(reader.buffered(), b"k");
        assert_eq!(reader.get_char(None).unwrap(), Some(b'k'));
        assert!(!reader.eof());
        assert_eq!(reader.get_char(None).unwrap(), None);
        assert!(reader.eof());
    }

    #[test]
    fn get_char_timeout() {
        let transport = FakeTransport::builder().timeout().build();
        let mut reader = BufferedReader::new(transport);

        assert!(reader.get_char(Some(Duration::ZERO)).unwrap_err().is_timeout());
    }

    #[test]
    fn into_inner_returns_transport() {
        let reader = BufferedReader::new(FakeTransport::new(b"abc"));

        let transport = reader.into_inner();
        assert_eq!(transport.read_calls(), 0);
    }

    #[test]
    fn works_with_borrowed_transport() {
        let mut transport = FakeTransport::new(b"a\n");

        {
            let mut reader = BufferedReader::new(&mut transport);
            assert_eq!(reader.read_line(b"\n", None).unwrap(), ReadOutcome::Data(b"a\n"));
        }

        assert!(transport.is_exhausted());
    }

    #[test]
    #[traced_test]
    fn transport_calls_are_traced() {
        let transport = FakeTransport::builder().data(b"abc").eof().build();
        let mut reader = BufferedReader::new(transport);

        _ = reader.read_bytes(5, None).unwrap();

        assert!(logs_contain("transport read"));
        assert!(logs_contain("end of stream"));
    }
}
