//! Bounded byte pipe between the compression worker and the flush loop
//!
//! The producer side ([`TransferWriter`]) is a blocking `std::io::Write` meant
//! for worker threads: when the buffer is full it parks on a condvar until the
//! consumer drains it. The consumer side ([`TransferBuffer`]) never blocks: it
//! reads what is available and awaits [`TransferBuffer::readable`] otherwise.

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::Notify;

struct BufferState {
    data: BytesMut,
    /// Producer finished the archive; no more bytes will arrive
    complete: bool,
    /// Consumer gave up; pending and future bytes are discarded
    closed: bool,
}

struct Shared {
    state: Mutex<BufferState>,
    writable: Condvar,
    readable: Notify,
    capacity: usize,
}

/// Consumer handle of the transfer buffer
#[derive(Clone)]
pub struct TransferBuffer {
    shared: Arc<Shared>,
}

/// Producer handle of the transfer buffer
pub struct TransferWriter {
    shared: Arc<Shared>,
}

impl TransferBuffer {
    /// Create a buffer holding at most `capacity` undelivered bytes
    pub fn new(capacity: usize) -> (TransferBuffer, TransferWriter) {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(BufferState {
                data: BytesMut::with_capacity(capacity),
                complete: false,
                closed: false,
            }),
            writable: Condvar::new(),
            readable: Notify::new(),
            capacity,
        });

        (
            TransferBuffer {
                shared: shared.clone(),
            },
            TransferWriter { shared },
        )
    }

    /// Maximum number of undelivered bytes
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes ready to be taken
    pub fn available(&self) -> usize {
        self.shared.state.lock().data.len()
    }

    /// True once the producer has written its last byte
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().complete
    }

    /// True after [`close`](Self::close)
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Take every available byte in one piece and wake a blocked producer
    pub fn take(&self) -> Bytes {
        let chunk = {
            let mut state = self.shared.state.lock();
            state.data.split().freeze()
        };
        self.shared.writable.notify_all();
        chunk
    }

    /// Wait until the producer writes, completes, or the buffer is closed
    ///
    /// May return spuriously; callers re-check [`available`](Self::available).
    pub async fn readable(&self) {
        self.shared.readable.notified().await;
    }

    /// Discard pending bytes and fail the producer's current and future writes
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.data.clear();
        }
        self.shared.writable.notify_all();
        self.shared.readable.notify_one();
    }
}

impl TransferWriter {
    /// Mark the end of the archive. Bytes already written stay readable.
    pub fn complete(self) {
        self.shared.state.lock().complete = true;
        self.shared.readable.notify_one();
    }
}

impl Write for TransferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "transfer buffer closed by consumer",
                ));
            }

            let space = self.shared.capacity - state.data.len();
            if space > 0 {
                let n = space.min(buf.len());
                state.data.extend_from_slice(&buf[..n]);
                drop(state);
                self.shared.readable.notify_one();
                return Ok(n);
            }

            self.shared.writable.wait(&mut state);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
