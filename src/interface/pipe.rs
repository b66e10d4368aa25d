//! In-memory pipe implementation
//!
//! ## Pipe Module
//!
//! A pipe is a bounded byte queue with exactly one sink (write end) and one
//! source (read end). Each end is wrapped by its own I/O channel; the pipe
//! keeps the wake-up registries of both ends so that any state change on one
//! side can release whoever is blocked on the other side.

// To learn more about pipes
// [pipe(7)](https://man7.org/linux/man-pages/man7/pipe.7.html)
use crate::interface::errnos::{syscall_error, Errno, SyscallResult};
use crate::interface::wakeup::WakeUpRegistry;

use parking_lot::Mutex;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size of a pipe's ring buffer in bytes.
pub const PIPE_BUFFER_SIZE: usize = 4096;

/// # Description
/// Helper function to create pipe objects
///
/// # Arguments
///
/// * `size` - Capacity of the ring buffer in bytes
///
/// # Returns
///
/// Shared EmulatedPipe object, to be handed to a source and a sink channel
pub fn new_pipe(size: usize) -> Arc<EmulatedPipe> {
    Arc::new(EmulatedPipe::new_with_capacity(size))
}

/// # Description
/// In-memory pipe struct
///
/// # Fields
///
/// * `write_end` - Producer half of the ring buffer.
/// * `read_end` - Consumer half of the ring buffer.
/// * `sink_closed` - Set once the write-end channel is gone; readers see EOF.
/// * `source_closed` - Set once the read-end channel is gone; writers fail.
/// * `source_waiters` - Waiters for the pipe becoming readable.
/// * `sink_waiters` - Waiters for the pipe becoming writable.
pub struct EmulatedPipe {
    write_end: Mutex<Producer<u8>>,
    read_end: Mutex<Consumer<u8>>,
    sink_closed: AtomicBool,
    source_closed: AtomicBool,
    source_waiters: Arc<WakeUpRegistry>,
    sink_waiters: Arc<WakeUpRegistry>,
    size: usize,
}

impl EmulatedPipe {
    pub fn new_with_capacity(size: usize) -> EmulatedPipe {
        let rb = RingBuffer::<u8>::new(size);
        let (prod, cons) = rb.split();
        EmulatedPipe {
            write_end: Mutex::new(prod),
            read_end: Mutex::new(cons),
            sink_closed: AtomicBool::new(false),
            source_closed: AtomicBool::new(false),
            source_waiters: WakeUpRegistry::new(),
            sink_waiters: WakeUpRegistry::new(),
            size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    pub fn source_waiters(&self) -> Arc<WakeUpRegistry> {
        self.source_waiters.clone()
    }

    pub fn sink_waiters(&self) -> Arc<WakeUpRegistry> {
        self.sink_waiters.clone()
    }

    pub fn is_sink_closed(&self) -> bool {
        self.sink_closed.load(Ordering::SeqCst)
    }

    pub fn is_source_closed(&self) -> bool {
        self.source_closed.load(Ordering::SeqCst)
    }

    /// Marks the write end as gone and lets blocked readers observe EOF.
    pub fn close_sink(&self) {
        self.sink_closed.store(true, Ordering::SeqCst);
        self.source_waiters.notify_all();
    }

    /// Marks the read end as gone and lets blocked writers observe the error.
    pub fn close_source(&self) {
        self.source_closed.store(true, Ordering::SeqCst);
        self.sink_waiters.notify_all();
    }

    /// # Description
    /// Checks if pipe is currently ready for reading, used by select and read
    ///
    /// # Returns
    ///
    /// True if there is data, or if the sink is closed (read returns EOF)
    pub fn check_select_read(&self) -> bool {
        let read_end = self.read_end.lock();
        read_end.len() > 0 || self.is_sink_closed()
    }

    /// # Description
    /// Checks if pipe is currently ready for writing, used by select and write
    ///
    /// # Returns
    ///
    /// True if there is free space, or if the source is closed (write fails
    /// right away instead of blocking forever)
    pub fn check_select_write(&self) -> bool {
        let write_end = self.write_end.lock();
        write_end.remaining() > 0 || self.is_source_closed()
    }

    /// ### Description
    ///
    /// write_to_pipe appends as many bytes of `buf` as fit into the buffer.
    ///
    /// ### Returns
    ///
    /// The number of bytes accepted, zero if the buffer is full.
    ///
    /// ### Errors
    ///
    /// * `PermissionDenied` - the read end has been closed (broken pipe).
    pub fn write_to_pipe(&self, buf: &[u8]) -> SyscallResult<usize> {
        if self.is_source_closed() {
            return Err(syscall_error(
                Errno::PermissionDenied,
                "write",
                "broken pipe",
            ));
        }

        let written = {
            let mut write_end = self.write_end.lock();
            write_end.push_slice(buf)
        };

        if written > 0 {
            self.source_waiters.notify_all();
        }
        Ok(written)
    }

    /// ### Description
    ///
    /// read_from_pipe drains up to `buf.len()` bytes from the buffer.
    ///
    /// ### Returns
    ///
    /// The number of bytes read. Zero either means end-of-stream (sink
    /// closed) or that nothing is buffered yet; callers consult
    /// `check_select_read` to tell the two apart before reading.
    pub fn read_from_pipe(&self, buf: &mut [u8]) -> usize {
        let read = {
            let mut read_end = self.read_end.lock();
            read_end.pop_slice(buf)
        };

        if read > 0 {
            self.sink_waiters.notify_all();
        }
        read
    }

    pub fn buffered(&self) -> usize {
        self.read_end.lock().len()
    }
}

impl fmt::Debug for EmulatedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedPipe")
            .field("size", &self.size)
            .field("sink_closed", &self.sink_closed)
            .field("source_closed", &self.source_closed)
            .finish()
    }
}
