//! Bounded single-producer/single-consumer byte pipe.
//!
//! This is the only primitive that carries data between the worker threads.
//! One mutex guards the ring; two condition variables signal "not empty"
//! (for the reader) and "not full" (for the writer). All blocking waits are
//! predicate-checked in a loop, so spurious wakeups are harmless.
//!
//! Closing is one-way: once closed, writes fail immediately, while reads
//! keep draining whatever is buffered and only start failing when the pipe
//! is both closed and empty. That drain-then-fail behavior is what lets the
//! supervisor flush in-flight data during shutdown.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::errors::{BridgeError, BridgeResult};

struct PipeInner {
    buf: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

/// A bounded byte queue safe for one producer and one consumer.
pub struct BytePipe {
    inner: Mutex<PipeInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl BytePipe {
    /// Create a pipe holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> BridgeResult<Self> {
        if capacity == 0 {
            return Err(BridgeError::InvalidArgument(
                "pipe capacity must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(PipeInner {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    // A poisoned mutex means a panic mid-operation somewhere else; the byte
    // ring itself is still structurally sound, so keep serving.
    fn lock(&self) -> MutexGuard<'_, PipeInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write up to `free()` bytes immediately. Returns the count written,
    /// which may be 0 when the pipe is full.
    pub fn write(&self, bytes: &[u8]) -> BridgeResult<usize> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BridgeError::Closed);
        }
        let n = Self::push(&mut inner, bytes);
        if n > 0 {
            self.not_empty.notify_one();
        }
        Ok(n)
    }

    /// Write, blocking until at least one byte fits or `deadline` passes.
    /// Returns 0 on deadline expiry with no progress.
    pub fn write_timed(&self, bytes: &[u8], deadline: Instant) -> BridgeResult<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(BridgeError::Closed);
            }
            let n = Self::push(&mut inner, bytes);
            if n > 0 {
                self.not_empty.notify_one();
                return Ok(n);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Read up to `out.len()` bytes immediately. Returns the count read,
    /// which may be 0 when the pipe is empty.
    pub fn read(&self, out: &mut [u8]) -> BridgeResult<usize> {
        if out.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "read buffer must be non-empty".to_string(),
            ));
        }
        let mut inner = self.lock();
        let n = Self::pop(&mut inner, out);
        if n > 0 {
            self.not_full.notify_one();
            Ok(n)
        } else if inner.closed {
            Err(BridgeError::Closed)
        } else {
            Ok(0)
        }
    }

    /// Read, blocking until at least one byte arrives or `deadline` passes.
    /// Returns 0 on deadline expiry with no progress.
    pub fn read_timed(&self, out: &mut [u8], deadline: Instant) -> BridgeResult<usize> {
        if out.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "read buffer must be non-empty".to_string(),
            ));
        }
        let mut inner = self.lock();
        loop {
            let n = Self::pop(&mut inner, out);
            if n > 0 {
                self.not_full.notify_one();
                return Ok(n);
            }
            if inner.closed {
                return Err(BridgeError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Bytes currently buffered.
    pub fn available(&self) -> usize {
        self.lock().buf.len()
    }

    /// Bytes that can be written before the pipe is full.
    pub fn free(&self) -> usize {
        let inner = self.lock();
        inner.capacity - inner.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the pipe: writes fail from now on, reads drain then fail.
    /// Both condvars are broadcast so blocked threads re-check and exit.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn push(inner: &mut PipeInner, bytes: &[u8]) -> usize {
        let space = inner.capacity - inner.buf.len();
        let n = space.min(bytes.len());
        inner.buf.extend(&bytes[..n]);
        n
    }

    fn pop(inner: &mut PipeInner, out: &mut [u8]) -> usize {
        let n = inner.buf.len().min(out.len());
        for slot in out.iter_mut().take(n) {
            // pop_front cannot fail here: n <= buf.len()
            *slot = inner.buf.pop_front().unwrap_or(0);
        }
        n
    }
}
