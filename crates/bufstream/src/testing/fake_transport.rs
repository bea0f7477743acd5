// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::io;
use std::num::NonZero;
use std::time::Duration;

use crate::Transport;

/// A [`Transport`] that replays a scripted sequence of read outcomes and collects written bytes.
///
/// Reads follow the script configured in the builder, one step per call. A data step larger than
/// the caller's buffer is delivered over several calls. Once the script is exhausted, every read
/// reports the end of the stream.
///
/// Writes append to an in-memory sink. They can be limited in size to force partial writes and
/// individual write calls can be configured to fail.
///
/// This is for test and example purposes only and is not optimized for performance.
#[derive(Debug)]
pub struct FakeTransport {
    script: VecDeque<ReadStep>,

    // For testing purposes, we may choose to limit the write size and
    // thereby force the caller to do multiple write operations.
    max_write_size: Option<NonZero<usize>>,
    write_failures: Vec<(usize, io::ErrorKind)>,

    written: Vec<u8>,
    read_calls: usize,
    timeout_read_calls: usize,
    write_calls: usize,
    last_timeout: Option<Duration>,
}

#[derive(Debug)]
enum ReadStep {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
    Eof,
}

impl FakeTransport {
    /// Starts building a new `FakeTransport`.
    #[must_use]
    pub fn builder() -> FakeTransportBuilder {
        FakeTransportBuilder {
            script: VecDeque::new(),
            max_write_size: None,
            write_failures: Vec::new(),
        }
    }

    /// Creates a `FakeTransport` that delivers `contents` in a single read and then ends.
    #[must_use]
    pub fn new(contents: impl AsRef<[u8]>) -> Self {
        Self::builder().data(contents).build()
    }

    /// The bytes written to the transport so far, in order.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Consumes the instance and returns the bytes written to it.
    #[must_use]
    pub fn into_written(self) -> Vec<u8> {
        self.written
    }

    /// Number of read calls made so far, with or without a timeout.
    #[must_use]
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    /// Number of read calls made so far that carried a timeout.
    #[must_use]
    pub fn timeout_read_calls(&self) -> usize {
        self.timeout_read_calls
    }

    /// Number of write calls made so far, including failed ones.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls
    }

    /// The timeout passed to the most recent timeout-bounded read.
    #[must_use]
    pub fn last_timeout(&self) -> Option<Duration> {
        self.last_timeout
    }

    /// Whether every scripted read step has been played back.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.script.is_empty()
    }

    #[cfg_attr(test, mutants::skip)] // Mutations easily lead to infinite loops, not worth the effort.
    fn next_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_calls += 1;

        match self.script.front_mut() {
            None | Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Fail(kind)) => {
                let kind = *kind;
                self.script.pop_front();
                Err(io::Error::new(kind, "scripted transport failure"))
            }
            Some(ReadStep::Data(data)) => {
                let count = data.len().min(buf.len());
                buf[..count].copy_from_slice(&data[..count]);
                data.drain(..count);

                if data.is_empty() {
                    self.script.pop_front();
                }

                Ok(count)
            }
        }
    }
}

impl Transport for FakeTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.next_read(buf)
    }

    fn timeout_read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.timeout_read_calls += 1;
        self.last_timeout = Some(timeout);
        self.next_read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let call = self.write_calls;
        self.write_calls += 1;

        if let Some((_, kind)) = self.write_failures.iter().find(|(index, _)| *index == call) {
            return Err(io::Error::new(*kind, "scripted transport failure"));
        }

        let count = buf.len().min(self.max_write_size.map_or(usize::MAX, NonZero::get));
        self.written.extend_from_slice(&buf[..count]);

        Ok(count)
    }
}

/// Creates an instance of [`FakeTransport`].
///
/// Access through [`FakeTransport::builder()`].
#[derive(Debug)]
#[must_use]
pub struct FakeTransportBuilder {
    script: VecDeque<ReadStep>,
    max_write_size: Option<NonZero<usize>>,
    write_failures: Vec<(usize, io::ErrorKind)>,
}

impl FakeTransportBuilder {
    /// Appends a read step that delivers `bytes`.
    ///
    /// A single step is delivered over several reads if the reader's buffer is smaller.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is empty. Use [`eof()`][Self::eof] to end the stream.
    pub fn data(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        assert!(!bytes.is_empty(), "an empty read signals end of stream, use eof() instead");

        self.script.push_back(ReadStep::Data(bytes.to_vec()));
        self
    }

    /// Appends one read step per byte of `bytes`, delivering them one at a time.
    pub fn data_bytewise(mut self, bytes: impl AsRef<[u8]>) -> Self {
        for byte in bytes.as_ref() {
            self.script.push_back(ReadStep::Data(vec![*byte]));
        }
        self
    }

    /// Appends a read step that fails as if the read timeout elapsed.
    pub fn timeout(self) -> Self {
        self.error(io::ErrorKind::TimedOut)
    }

    /// Appends a read step that fails as if the blocking read was interrupted.
    pub fn interrupted(self) -> Self {
        self.error(io::ErrorKind::Interrupted)
    }

    /// Appends a read step that fails with an error of the given kind.
    pub fn error(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(ReadStep::Fail(kind));
        self
    }

    /// Appends a read step that ends the stream.
    ///
    /// Every read after this one also reports the end of the stream.
    pub fn eof(mut self) -> Self {
        self.script.push_back(ReadStep::Eof);
        self
    }

    /// Limits how many bytes a single write call accepts.
    pub fn max_write_size(mut self, max_write_size: NonZero<usize>) -> Self {
        self.max_write_size = Some(max_write_size);
        self
    }

    /// Makes the write call with the given zero-based index fail with an error of the given kind.
    pub fn fail_write(mut self, call_index: usize, kind: io::ErrorKind) -> Self {
        self.write_failures.push((call_index, kind));
        self
    }

    /// Builds the `FakeTransport` with the provided configuration.
    #[must_use]
    pub fn build(self) -> FakeTransport {
        FakeTransport {
            script: self.script,
            max_write_size: self.max_write_size,
            write_failures: self.write_failures,
            written: Vec::new(),
            read_calls: 0,
            timeout_read_calls: 0,
            write_calls: 0,
            last_timeout: None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn replays_script_in_order() {
        let mut transport = FakeTransport::builder().data(b"hello").timeout().data(b"!").build();
        let mut buf = [0_u8; 3];

        assert_eq!(transport.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");

        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");

        let error = transport.timeout_read(&mut buf, Duration::from_millis(5)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
        assert_eq!(transport.last_timeout(), Some(Duration::from_millis(5)));

        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert!(transport.is_exhausted());

        assert_eq!(transport.read(&mut buf).unwrap(), 0);
        assert_eq!(transport.read_calls(), 5);
        assert_eq!(transport.timeout_read_calls(), 1);
    }

    #[test]
    fn eof_step_is_sticky() {
        let mut transport = FakeTransport::builder().eof().data(b"never").build();
        let mut buf = [0_u8; 8];

        assert_eq!(transport.read(&mut buf).unwrap(), 0);
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn bytewise_delivers_one_byte_per_read() {
        let mut transport = FakeTransport::builder().data_bytewise(b"ab").build();
        let mut buf = [0_u8; 8];

        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn writes_are_limited_and_can_fail() {
        let mut transport = FakeTransport::builder()
            .max_write_size(nz!(2))
            .fail_write(1, io::ErrorKind::BrokenPipe)
            .build();

        assert_eq!(transport.write(b"abc").unwrap(), 2);
        assert_eq!(transport.write(b"c").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(transport.write(b"c").unwrap(), 1);

        assert_eq!(transport.write_calls(), 3);
        assert_eq!(transport.into_written(), b"abc");
    }

    #[test]
    #[should_panic]
    fn empty_data_step_panics() {
        _ = FakeTransport::builder().data(b"");
    }
}
