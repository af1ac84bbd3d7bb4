//! In-memory relay buffer between a channel audio producer and the playback sink.
//!
//! One producer appends bytes with [`RelayStream::write`] while one consumer
//! drains them with [`RelayStream::read`]. Both sides share a single mutex that
//! covers only the copy and the cursor update, so neither side ever blocks on
//! the other for longer than a `memcpy`.
//!
//! A read that returns 0 means "nothing available right now". The end of the
//! stream is signalled out-of-band by the producer calling
//! [`RelayStream::finish`]; consumers check [`RelayStream::is_drained`].

use std::io::{self, SeekFrom};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Errors raised by [`RelayStream`] operations that are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The stream only supports forward sequential reads.
    #[error("relay stream does not support seeking (requested {0:?})")]
    SeekUnsupported(SeekFrom),
}

#[derive(Debug, Default)]
struct RelayState {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    finished: bool,
    closed: bool,
}

/// Single-producer / single-consumer append-only byte buffer.
#[derive(Debug, Default)]
pub struct RelayStream {
    state: Mutex<RelayState>,
}

impl RelayStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        // A panicking holder cannot leave the cursors half-updated: every
        // critical section updates them after the copy completes.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `data` at the write cursor.
    ///
    /// Returns the number of bytes accepted: `data.len()` while the stream is
    /// open, 0 once it has been closed.
    pub fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut state = self.lock();
        if state.closed {
            return 0;
        }
        // Append only: the write cursor is always the buffer end.
        state.buf.extend_from_slice(data);
        state.write_pos = state.buf.len();
        data.len()
    }

    /// Copy up to `out.len()` unread bytes into `out` and advance the read cursor.
    ///
    /// Returns 0 when the consumer has caught up with the producer, or after
    /// [`close`](Self::close). A zero return is not end-of-stream on its own.
    pub fn read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut state = self.lock();
        if state.closed {
            return 0;
        }
        let available = state.write_pos - state.read_pos;
        let n = available.min(out.len());
        if n == 0 {
            return 0;
        }
        let start = state.read_pos;
        out[..n].copy_from_slice(&state.buf[start..start + n]);
        state.read_pos = start + n;
        n
    }

    /// Producer side: no more bytes will be written.
    ///
    /// Bytes already written stay readable. Calling this more than once is a no-op.
    pub fn finish(&self) {
        self.lock().finished = true;
    }

    /// Release the underlying buffer.
    ///
    /// Later reads return 0 and later writes are dropped. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.finished = true;
        state.buf = Vec::new();
    }

    /// Positioning is unsupported; every request is rejected.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64, RelayError> {
        Err(RelayError::SeekUnsupported(pos))
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True once the producer has finished and every written byte was read,
    /// or once the stream was closed.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed || (state.finished && state.read_pos == state.write_pos)
    }

    /// Bytes written but not yet read.
    pub fn available(&self) -> usize {
        let state = self.lock();
        if state.closed {
            0
        } else {
            state.write_pos - state.read_pos
        }
    }

    /// Total bytes written so far.
    pub fn len(&self) -> usize {
        self.lock().write_pos
    }

    /// Current read cursor.
    pub fn position(&self) -> u64 {
        self.lock().read_pos as u64
    }
}

impl io::Read for &RelayStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(RelayStream::read(self, buf))
    }
}

impl io::Write for &RelayStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "relay stream is closed",
            ));
        }
        Ok(RelayStream::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for &RelayStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        RelayStream::seek(self, pos).map_err(|e| io::Error::new(io::ErrorKind::Unsupported, e))
    }
}
