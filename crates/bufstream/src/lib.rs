// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Buffered stream I/O for line-oriented and record-oriented protocols.
//!
//! This crate layers buffering over a blocking byte [`Transport`] such as a TCP or Unix socket:
//!
//! * [`BufferedReader`] accumulates incoming bytes and serves delimiter-terminated lines, exact
//!   byte counts, whatever happens to be available, or single bytes. Every read accepts an optional
//!   timeout that bounds each individual transport call.
//! * [`BufferedWriter`] collects outgoing bytes and formatted text and hands them to the transport
//!   in as few writes as possible, flushing automatically once a configurable amount is buffered.
//!
//! Both sit on a [`StreamBuffer`][buffer::StreamBuffer], a growable byte region that is consumed
//! from the front and filled at the back. The reader and writer own their buffer and never expose
//! it; protocol code works only with their operations and the slices they return.
//!
//! Timeouts, interruptions and transport failures surface as [`Error`] values and are never
//! retried internally. Buffered data survives every failure, so an operation can simply be
//! repeated.
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! use bufstream::{BufferedReader, BufferedWriter, ReadOutcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = TcpStream::connect("127.0.0.1:25")?;
//! let mut reader = BufferedReader::new(&socket);
//! let mut writer = BufferedWriter::new(&socket);
//!
//! if let ReadOutcome::Data(greeting) = reader.read_line(b"\r\n", Some(Duration::from_secs(30)))? {
//!     println!("server says {}", String::from_utf8_lossy(greeting));
//! }
//!
//! writer.printf(format_args!("EHLO {}\r\n", "client.example.com"))?;
//! # Ok(())
//! # }
//! ```
//!
//! The `test-util` feature enables `FakeTransport`, a scripted in-memory transport for
//! testing code built on these types. It lives in the `testing` module.

pub mod buffer;
mod error;
mod reader;
mod transport;
mod writer;

pub use buffer::StreamBuffer;
pub use error::{Error, ErrorKind, Result};
pub use reader::{BufferedReader, BufferedReaderBuilder, DEFAULT_READ_AHEAD, ReadOutcome};
pub use transport::Transport;
pub use writer::{BufferedWriter, BufferedWriterBuilder, DEFAULT_FLUSH_LIMIT};

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
