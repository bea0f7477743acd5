// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A growable byte buffer designed for stream-oriented I/O.
//!
//! [`StreamBuffer`] is appended to at its tail and consumed from its head. The producer side
//! ([`reserve()`][StreamBuffer::reserve], [`tail_mut()`][StreamBuffer::tail_mut],
//! [`fill()`][StreamBuffer::fill]) hands free memory directly to an I/O call, so data read from a
//! transport lands in the buffer without an intermediate copy. The consumer side
//! ([`data()`][StreamBuffer::data], [`consume()`][StreamBuffer::consume]) hands out views of the
//! unconsumed bytes.
//!
//! [`BufferedReader`][crate::BufferedReader] and [`BufferedWriter`][crate::BufferedWriter] keep
//! their buffer private. The type is public as a building block for transports and framing layers
//! that need the same reserve-then-fill discipline, and so that the capacity constants used by the
//! builders are documented in one place.
//!
//! # Example
//!
//! ```
//! use bufstream::StreamBuffer;
//!
//! let mut buffer = StreamBuffer::new();
//!
//! buffer.reserve(5);
//! buffer.tail_mut()[..5].copy_from_slice(b"hello");
//! buffer.fill(5);
//!
//! assert_eq!(buffer.data(), b"hello");
//!
//! buffer.consume(2);
//! assert_eq!(buffer.data(), b"llo");
//! ```

use std::fmt;

use tracing::{Level, event};

/// Capacity of a [`StreamBuffer`] created via [`StreamBuffer::new()`].
pub const DEFAULT_CAPACITY: usize = 1024;

/// Smallest capacity a [`StreamBuffer`] is ever given. Requests for less are raised to this.
pub const MIN_CAPACITY: usize = 4;

/// A contiguous, resizable byte buffer with independent head and tail offsets.
///
/// # Invariants
///
/// `0 <= head <= tail <= capacity` holds at all times. The bytes in `[head, tail)` are the
/// unconsumed data in the order they were appended; the bytes in `[tail, capacity)` are free
/// tail-room. Whenever consumption empties the buffer, both offsets are reset to 0 so that the
/// head does not creep towards the end of the storage.
///
/// Operations that would violate the invariants (filling beyond the tail-room, consuming more than
/// is buffered, resizing below the buffered length) are programming errors and panic.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    // The length of the vector is the capacity of the buffer. Every byte is initialized so the
    // tail-room can be handed out as a plain `&mut [u8]`.
    storage: Vec<u8>,
    head: usize,
    tail: usize,
}

impl StreamBuffer {
    /// Creates an empty buffer with [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty buffer with the given capacity.
    ///
    /// A capacity below [`MIN_CAPACITY`] is raised to [`MIN_CAPACITY`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity.max(MIN_CAPACITY)],
            head: 0,
            tail: 0,
        }
    }

    /// The unconsumed bytes, oldest first.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    /// The free tail-room, where new data is appended.
    ///
    /// After writing `n` bytes to the start of this slice, call [`fill(n)`][Self::fill] to make
    /// them part of the buffered data.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.tail..]
    }

    /// Number of unconsumed bytes.
    #[must_use]
    pub fn full_bytes(&self) -> usize {
        self.tail - self.head
    }

    /// Number of bytes that can be appended without compacting or growing.
    #[must_use]
    pub fn tail_bytes(&self) -> usize {
        self.capacity() - self.tail
    }

    /// Total size of the storage.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Whether there are no unconsumed bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Ensures that at least `amount` bytes of tail-room are available.
    ///
    /// If the tail-room is already large enough, nothing happens. If moving the unconsumed bytes
    /// to the front of the storage frees enough room, the buffer is compacted. Otherwise the buffer
    /// is compacted and grown to twice its capacity, or to exactly what the reservation needs if
    /// that is larger. The unconsumed bytes are preserved in all cases.
    pub fn reserve(&mut self, amount: usize) {
        if amount <= self.tail_bytes() {
            return;
        }

        self.compact();

        if amount <= self.tail_bytes() {
            return;
        }

        let required = self
            .full_bytes()
            .checked_add(amount)
            .expect("reservation exceeds addressable memory");
        let new_capacity = required.max(self.capacity().saturating_mul(2));

        event!(
            Level::DEBUG,
            message = "growing stream buffer",
            old_capacity = self.capacity(),
            new_capacity,
            buffered = self.full_bytes()
        );

        self.storage.resize(new_capacity, 0);
    }

    /// Marks `amount` bytes at the start of the tail-room as buffered data.
    ///
    /// # Panics
    ///
    /// Panics if `amount` is larger than [`tail_bytes()`][Self::tail_bytes].
    pub fn fill(&mut self, amount: usize) {
        assert!(
            amount <= self.tail_bytes(),
            "cannot fill {amount} bytes, only {} bytes of tail-room available",
            self.tail_bytes()
        );

        self.tail += amount;
    }

    /// Discards `amount` bytes from the front of the buffered data.
    ///
    /// # Panics
    ///
    /// Panics if `amount` is larger than [`full_bytes()`][Self::full_bytes].
    pub fn consume(&mut self, amount: usize) {
        assert!(
            amount <= self.full_bytes(),
            "cannot consume {amount} bytes, only {} bytes buffered",
            self.full_bytes()
        );

        self.head += amount;

        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Consumes `amount` bytes and returns a view of them.
    ///
    /// The view borrows the buffer, so it cannot outlive the next operation that modifies it.
    ///
    /// # Panics
    ///
    /// Panics if `amount` is larger than [`full_bytes()`][Self::full_bytes].
    pub fn take(&mut self, amount: usize) -> &[u8] {
        let start = self.head;
        self.consume(amount);

        // Consuming only moves the offsets, the bytes themselves stay where they are until the
        // next write into the storage.
        &self.storage[start..start + amount]
    }

    /// Copies `bytes` to the end of the buffered data, growing the buffer if necessary.
    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.tail_mut()[..bytes.len()].copy_from_slice(bytes);
        self.fill(bytes.len());
    }

    /// Discards all buffered data. The storage is kept.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Resizes the storage to `size` bytes after moving the buffered data to the front.
    ///
    /// A size below [`MIN_CAPACITY`] is raised to [`MIN_CAPACITY`].
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [`full_bytes()`][Self::full_bytes].
    pub fn set_size(&mut self, size: usize) {
        assert!(
            size >= self.full_bytes(),
            "cannot resize to {size} bytes, {} bytes are buffered",
            self.full_bytes()
        );

        self.compact();
        self.storage.resize(size.max(MIN_CAPACITY), 0);
        self.storage.shrink_to_fit();
    }

    /// Moves the unconsumed bytes to the start of the storage.
    fn compact(&mut self) {
        if self.head == 0 {
            return;
        }

        self.storage.copy_within(self.head..self.tail, 0);
        self.tail -= self.head;
        self.head = 0;
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The storage can be large and is mostly noise, so only the shape is printed.
        f.debug_struct("StreamBuffer")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("capacity", &self.capacity())
            .finish()
    }
}
