//! Unidirectional byte-stream pipes backing the `pipe` syscall and the
//! `Pipe` wait channel.
//!
//! A blocked reader or writer parks on [`sched::WaitChannel::Pipe`] rather
//! than spinning; the other end wakes the channel on every write/read/close
//! so nothing is left parked once there is something to do. Both sides
//! re-check for a deliverable signal on every wake, since a blocked read or
//! write must return `-EINTR` rather than keep waiting once one arrives.

use alloc::{collections::VecDeque, sync::Arc};

use spin::Mutex;

use crate::error::KernelError;
use crate::sched::{self, WaitChannel};

/// Default pipe capacity (64 KiB).
const PIPE_CAPACITY: usize = 64 * 1024;

struct PipeInner {
    buffer: VecDeque<u8>,
    capacity: usize,
    write_closed: bool,
    read_closed: bool,
}

impl PipeInner {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            write_closed: false,
            read_closed: false,
        }
    }
}

type PipeState = Arc<Mutex<PipeInner>>;

/// The read end of a kernel pipe.
pub struct PipeReader {
    inner: PipeState,
}

/// The write end of a kernel pipe.
pub struct PipeWriter {
    inner: PipeState,
}

/// Creates a new pipe pair `(reader, writer)` with the default capacity.
pub fn create_pipe() -> Result<(PipeReader, PipeWriter), KernelError> {
    create_pipe_with_capacity(PIPE_CAPACITY)
}

pub fn create_pipe_with_capacity(capacity: usize) -> Result<(PipeReader, PipeWriter), KernelError> {
    let inner = Arc::new(Mutex::new(PipeInner::new(capacity)));
    Ok((PipeReader { inner: inner.clone() }, PipeWriter { inner }))
}

/// Returns `true` if the current task has a pending signal it isn't
/// blocking, i.e. a blocking operation should abort with `-EINTR` now
/// instead of waiting for more data/space.
fn signal_interrupts() -> bool {
    let current = sched::current_task();
    current.signal.pending_mask() & !current.signal.blocked_mask() != 0
}

impl PipeReader {
    /// Reads up to `buf.len()` bytes, blocking on [`WaitChannel::Pipe`] while
    /// the buffer is empty and the write end is still open. Returns `0` at
    /// EOF (write end closed, buffer drained) and `-EINTR` if a signal
    /// becomes deliverable while parked.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, KernelError> {
        loop {
            {
                let mut pipe = self.inner.lock();
                if !pipe.buffer.is_empty() {
                    let to_read = buf.len().min(pipe.buffer.len());
                    for byte in buf.iter_mut().take(to_read) {
                        *byte = pipe.buffer.pop_front().unwrap_or(0);
                    }
                    return Ok(to_read);
                }
                if pipe.write_closed || pipe.read_closed {
                    return Ok(0);
                }
            }
            if signal_interrupts() {
                return Err(KernelError::Interrupted);
            }
            sched::block_on(WaitChannel::Pipe);
        }
    }

    /// Non-blocking read: returns `-EWOULDBLOCK` immediately instead of
    /// parking if no data is available and the write end is still open.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize, KernelError> {
        let mut pipe = self.inner.lock();
        if pipe.buffer.is_empty() {
            if pipe.write_closed {
                return Ok(0);
            }
            return Err(KernelError::WouldBlock);
        }
        let to_read = buf.len().min(pipe.buffer.len());
        for byte in buf.iter_mut().take(to_read) {
            *byte = pipe.buffer.pop_front().unwrap_or(0);
        }
        Ok(to_read)
    }

    pub fn close(&self) {
        self.inner.lock().read_closed = true;
        sched::wake_channel(WaitChannel::Pipe);
    }

    pub fn has_data(&self) -> bool {
        !self.inner.lock().buffer.is_empty()
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl PipeWriter {
    /// Writes as many of `data`'s bytes as fit in the remaining capacity
    /// without blocking, waking any reader parked on [`WaitChannel::Pipe`]
    /// if it wrote anything. Returns `BrokenPipe` once the read end has
    /// closed.
    pub fn write(&self, data: &[u8]) -> Result<usize, KernelError> {
        let to_write = {
            let mut pipe = self.inner.lock();
            if pipe.read_closed || pipe.write_closed {
                return Err(KernelError::BrokenPipe);
            }
            let available = pipe.capacity.saturating_sub(pipe.buffer.len());
            let to_write = data.len().min(available);
            for &byte in &data[..to_write] {
                pipe.buffer.push_back(byte);
            }
            to_write
        };
        if to_write > 0 {
            sched::wake_channel(WaitChannel::Pipe);
        }
        Ok(to_write)
    }

    /// Writes all of `data`, blocking on [`WaitChannel::Pipe`] while the
    /// buffer is full. Returns `-EINTR` if a signal becomes deliverable
    /// while parked, with `offset` bytes already written and lost to the
    /// caller's view (matches a short Linux pipe write under `EINTR`).
    pub fn write_all(&self, data: &[u8]) -> Result<(), KernelError> {
        let mut offset = 0;
        while offset < data.len() {
            let written = self.write(&data[offset..])?;
            offset += written;
            if written == 0 && offset < data.len() {
                if signal_interrupts() {
                    return Err(KernelError::Interrupted);
                }
                sched::block_on(WaitChannel::Pipe);
            }
        }
        Ok(())
    }

    pub fn close(&self) {
        self.inner.lock().write_closed = true;
        sched::wake_channel(WaitChannel::Pipe);
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_basic_read_write() {
        let (reader, writer) = create_pipe().unwrap();
        writer.write(b"hello").unwrap();
        writer.close();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_pipe_eof_after_close() {
        let (reader, writer) = create_pipe().unwrap();
        writer.close();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_pipe_broken_pipe() {
        let (reader, writer) = create_pipe().unwrap();
        reader.close();
        let result = writer.write(b"data");
        assert!(result.is_err());
    }

    #[test]
    fn test_pipe_large_write() {
        let (reader, writer) = create_pipe_with_capacity(16).unwrap();
        let n = writer.write(b"this is a long string").unwrap();
        assert_eq!(n, 16);
        writer.close();
        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 16);
    }

    #[test]
    fn test_pipe_try_read_would_block_when_open_and_empty() {
        let (reader, writer) = create_pipe().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(reader.try_read(&mut buf), Err(KernelError::WouldBlock));
        drop(writer);
    }
}
