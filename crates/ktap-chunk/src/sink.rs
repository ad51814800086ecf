//! Destinations for dumped bytes.
//!
//! A sink returns `0` to accept a block and any other value to abort the
//! whole dump; the writer never calls it again afterwards.

use std::io::{self, Write};

use ktap_core::{CoreError, CoreResult};
use tracing::trace;

/// Receives each block emitted by the writer, in traversal order.
pub trait Sink {
    /// Consumes `bytes`; `0` on success, non-zero aborts the dump.
    fn accept(&mut self, bytes: &[u8]) -> i32;
}

impl<F> Sink for F
where
    F: FnMut(&[u8]) -> i32,
{
    fn accept(&mut self, bytes: &[u8]) -> i32 { self(bytes) }
}

/// Initial capacity of a [`TrunkBuffer`].
pub const TRUNK_INITIAL_SIZE: usize = 1024;

/// Status returned by [`TrunkBuffer`] when growing fails (`-ENOMEM`).
const STATUS_NOMEM: i32 = -12;

/// Status returned by [`IoSink`] when the underlying writer fails (`-EIO`).
const STATUS_IO: i32 = -5;

/// In-memory chunk accumulator.
///
/// Unlike the per-function arrays, the trunk has no hard limit: when a write
/// does not fit, a fresh allocation of `(used + sz) * 2` bytes replaces the
/// old one.
#[derive(Debug, Clone)]
pub struct TrunkBuffer {
    buf: Vec<u8>,
    capacity: usize,
    reallocs: usize,
}

impl Default for TrunkBuffer {
    fn default() -> Self { Self::with_capacity(TRUNK_INITIAL_SIZE) }
}

impl TrunkBuffer {
    /// Trunk with the default initial capacity.
    pub fn new() -> Self { Self::default() }

    /// Trunk with `capacity` bytes preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity), capacity, reallocs: 0 }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize { self.buf.len() }

    /// True when nothing was written.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Committed capacity.
    pub const fn capacity(&self) -> usize { self.capacity }

    /// Number of grow steps taken.
    pub const fn reallocations(&self) -> usize { self.reallocs }

    /// Written bytes.
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Consumes the trunk.
    pub fn into_vec(self) -> Vec<u8> { self.buf }

    /// Appends `bytes`, growing to twice the needed size when full.
    ///
    /// On failure the trunk is left exactly as it was.
    pub fn write(&mut self, bytes: &[u8]) -> CoreResult<()> {
        let needed = self
            .buf
            .len()
            .checked_add(bytes.len())
            .ok_or(CoreError::AllocationFailure { what: "chunk bytes", requested: usize::MAX })?;
        if needed > self.capacity {
            let new_cap = needed
                .checked_mul(2)
                .ok_or(CoreError::AllocationFailure { what: "chunk bytes", requested: needed })?;
            let mut fresh = Vec::new();
            fresh
                .try_reserve_exact(new_cap)
                .map_err(|_| CoreError::AllocationFailure { what: "chunk bytes", requested: new_cap })?;
            fresh.extend_from_slice(&self.buf);
            trace!(from = self.capacity, to = new_cap, "trunk grow");
            self.buf = fresh;
            self.capacity = new_cap;
            self.reallocs += 1;
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

impl Sink for TrunkBuffer {
    fn accept(&mut self, bytes: &[u8]) -> i32 {
        match self.write(bytes) {
            Ok(()) => 0,
            Err(_) => STATUS_NOMEM,
        }
    }
}

/// Pass-through sink writing each block straight to an [`io::Write`].
#[derive(Debug)]
pub struct IoSink<W: Write> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> IoSink<W> {
    /// Wraps `inner`.
    pub const fn new(inner: W) -> Self { Self { inner, error: None } }

    /// The I/O error that made the sink reject a block, if any.
    pub fn take_error(&mut self) -> Option<io::Error> { self.error.take() }

    /// Flushes and returns the writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Sink for IoSink<W> {
    fn accept(&mut self, bytes: &[u8]) -> i32 {
        match self.inner.write_all(bytes) {
            Ok(()) => 0,
            Err(e) => {
                self.error = Some(e);
                STATUS_IO
            }
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
