//! Streaming archive generator
//!
//! [`ArchiveGenerator`] drains an [`EntrySource`], compresses each entry into a
//! ZIP archive and pushes the archive bytes to a consumer through three
//! callbacks (data, error, end), honoring `pause()`/`resume()` backpressure.
//!
//! Two cooperating tasks run on the generator's home context, a tokio
//! [`LocalSet`](tokio::task::LocalSet):
//!
//! - the **entry loop** opens entries, reads them chunk by chunk and feeds the
//!   ZIP writer. Every blocking step runs through `spawn_blocking`; the loop
//!   awaits the result back on the home context before touching state.
//! - the **flush loop** moves whatever the transfer buffer holds to the data
//!   callback while the generator is `Active`, and parks while `Paused`.
//!
//! The handle is `!Send`, so state transitions can only happen on the home
//! thread. Worker threads see nothing but the transfer buffer.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use zip_pump::{ArchiveGenerator, EntrySource, StreamingZipReader};
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()
//!     .unwrap();
//! let local = tokio::task::LocalSet::new();
//!
//! let archive = local.block_on(&runtime, async {
//!     let source = EntrySource::from_files([("a.txt", "hello"), ("b.txt", "world")]);
//!     let generator = ArchiveGenerator::new(source);
//!
//!     let bytes = Rc::new(RefCell::new(Vec::new()));
//!     let (done_tx, done_rx) = tokio::sync::oneshot::channel();
//!     let sink = bytes.clone();
//!     generator.attach(
//!         move |chunk| sink.borrow_mut().extend_from_slice(&chunk),
//!         |err| panic!("archive failed: {err}"),
//!         move || {
//!             let _ = done_tx.send(());
//!         },
//!     );
//!
//!     done_rx.await.unwrap();
//!     let archive = bytes.borrow().clone();
//!     archive
//! });
//!
//! let mut reader = StreamingZipReader::from_bytes(archive).unwrap();
//! assert_eq!(reader.read_entry_by_name("b.txt").unwrap(), b"world");
//! ```

use crate::buffer::{TransferBuffer, TransferWriter};
use crate::config::GeneratorConfig;
use crate::error::{ArchiveError, Result};
use crate::source::{EntryReader, EntrySource};
use crate::writer::StreamingZipWriter;
use bytes::Bytes;
use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::task;

/// Lifecycle state of a generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// The consumer wants data
    Active,
    /// The consumer asked for no data until `resume()`
    Paused,
    /// Terminal: finished, failed, or closed by the consumer
    Closed,
}

type DataHandler = Box<dyn FnMut(Bytes)>;
type ErrorHandler = Box<dyn FnOnce(ArchiveError)>;
type EndHandler = Box<dyn FnOnce()>;

type ZipSink = StreamingZipWriter<TransferWriter>;

struct Inner {
    state: GeneratorState,
    config: GeneratorConfig,
    // Handed to the entry loop on first attach
    source: Option<EntrySource>,
    sink: Option<ZipSink>,
    buffer: TransferBuffer,
    on_data: Option<DataHandler>,
    on_error: Option<ErrorHandler>,
    on_end: Option<EndHandler>,
    started: bool,
    // A flush loop task is alive
    flushing: bool,
    // Bumped on every pause and resume; lets the idle watchdog spot a stale pause
    pause_epoch: u64,
    bytes_emitted: u64,
    entries_written: usize,
}

impl Drop for Inner {
    // Last handle gone, e.g. the LocalSet was dropped without close():
    // fail a worker parked on a full buffer so it drops its entry stream
    fn drop(&mut self) {
        if self.state != GeneratorState::Closed {
            tracing::debug!("generator dropped while running, releasing worker");
        }
        self.buffer.close();
    }
}

enum Termination {
    Finished,
    Failed(ArchiveError),
}

/// Push-stream ZIP generator bound to one [`EntrySource`]
///
/// Cloning yields another handle to the same generator. All methods must be
/// called from the `LocalSet` the generator was attached on.
#[derive(Clone)]
pub struct ArchiveGenerator {
    inner: Rc<RefCell<Inner>>,
}

/// Non-owning handle, for use inside the generator's own callbacks
#[derive(Clone)]
pub struct WeakGenerator {
    inner: Weak<RefCell<Inner>>,
}

impl WeakGenerator {
    /// Upgrade to a full handle if the generator is still alive
    pub fn upgrade(&self) -> Option<ArchiveGenerator> {
        self.inner.upgrade().map(|inner| ArchiveGenerator { inner })
    }
}

impl ArchiveGenerator {
    /// Create a generator with the default configuration
    pub fn new(source: EntrySource) -> Self {
        Self::build(source, GeneratorConfig::default())
    }

    /// Create a generator with a validated configuration
    pub fn with_config(source: EntrySource, config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(source, config))
    }

    fn build(source: EntrySource, config: GeneratorConfig) -> Self {
        let (buffer, writer) = TransferBuffer::new(config.buffer_capacity);
        let sink = StreamingZipWriter::with_method(
            writer,
            config.compression_method,
            config.compression_level,
        )
        .with_flush_threshold(config.buffer_capacity)
        .with_zip64_entries(config.zip64_entries);

        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: GeneratorState::Active,
                config,
                source: Some(source),
                sink: Some(sink),
                buffer,
                on_data: None,
                on_error: None,
                on_end: None,
                started: false,
                flushing: false,
                pause_epoch: 0,
                bytes_emitted: 0,
                entries_written: 0,
            })),
        }
    }

    /// Register the consumer callbacks; the first call starts generation
    ///
    /// `on_data` receives archive bytes in order. Exactly one of `on_end` or
    /// `on_error` is called, once. Attaching again replaces all three
    /// callbacks: a generator has a single consumer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio `LocalSet`.
    pub fn attach<D, E, F>(&self, on_data: D, on_error: E, on_end: F)
    where
        D: FnMut(Bytes) + 'static,
        E: FnOnce(ArchiveError) + 'static,
        F: FnOnce() + 'static,
    {
        let start = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == GeneratorState::Closed {
                tracing::warn!("attach on a closed generator ignored");
                return;
            }
            inner.on_data = Some(Box::new(on_data));
            inner.on_error = Some(Box::new(on_error));
            inner.on_end = Some(Box::new(on_end));

            if inner.started {
                None
            } else {
                inner.started = true;
                inner.source.take().zip(inner.sink.take())
            }
        };

        if let Some((source, sink)) = start {
            let chunk_size = self.inner.borrow().config.chunk_size;
            task::spawn_local(entry_loop(Rc::clone(&self.inner), source, sink, chunk_size));
        }
        arm_flush(&self.inner);
    }

    /// Stop delivering data until [`resume`](Self::resume)
    ///
    /// Idempotent while paused; no-op once closed.
    pub fn pause(&self) {
        let (epoch, idle_timeout) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != GeneratorState::Active {
                return;
            }
            inner.state = GeneratorState::Paused;
            inner.pause_epoch += 1;
            (inner.pause_epoch, inner.config.idle_timeout())
        };
        tracing::trace!("generator paused");

        if let Some(timeout) = idle_timeout {
            task::spawn_local(idle_watchdog(Rc::downgrade(&self.inner), epoch, timeout));
        }
    }

    /// Deliver data again after [`pause`](Self::pause)
    ///
    /// Fails with [`ArchiveError::InvalidState`] once the generator is closed.
    pub fn resume(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                GeneratorState::Closed => {
                    return Err(ArchiveError::invalid_state(
                        "cannot resume, generator already closed",
                    ));
                }
                GeneratorState::Active => return Ok(()),
                GeneratorState::Paused => {
                    inner.state = GeneratorState::Active;
                    inner.pause_epoch += 1;
                }
            }
        }
        tracing::trace!("generator resumed");

        arm_flush(&self.inner);
        Ok(())
    }

    /// Abandon the generator
    ///
    /// Discards undelivered bytes, releases the worker and the open entry, and
    /// reports [`ArchiveError::Cancelled`] through the error callback. No-op
    /// once closed.
    pub fn close(&self) {
        terminate(&self.inner, Termination::Failed(ArchiveError::Cancelled));
    }

    /// Current lifecycle state
    pub fn state(&self) -> GeneratorState {
        self.inner.borrow().state
    }

    /// Archive bytes handed to the data callback so far
    pub fn bytes_emitted(&self) -> u64 {
        self.inner.borrow().bytes_emitted
    }

    /// Entries fully read and compressed so far
    pub fn entries_written(&self) -> usize {
        self.inner.borrow().entries_written
    }

    /// Handle that does not keep the generator alive
    pub fn downgrade(&self) -> WeakGenerator {
        WeakGenerator {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for ArchiveGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ArchiveGenerator")
            .field("state", &inner.state)
            .field("bytes_emitted", &inner.bytes_emitted)
            .field("entries_written", &inner.entries_written)
            .finish()
    }
}

fn is_closed(inner: &Rc<RefCell<Inner>>) -> bool {
    inner.borrow().state == GeneratorState::Closed
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| ArchiveError::Worker(err.to_string()))?
}

/// Fill `buf` from the reader; short only at end of stream
fn read_chunk(reader: &mut EntryReader, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// State carried through one entry's worker round trips
struct EntryJob {
    name: String,
    sink: ZipSink,
    reader: EntryReader,
    chunk: Vec<u8>,
}

impl EntryJob {
    /// Compress the next chunk; true at end of entry
    fn step(&mut self) -> Result<bool> {
        let n = read_chunk(&mut self.reader, &mut self.chunk)
            .map_err(|err| ArchiveError::source_failed(&self.name, err))?;
        self.sink.write_data(&self.chunk[..n])?;
        Ok(n < self.chunk.len())
    }
}

async fn entry_loop(
    inner: Rc<RefCell<Inner>>,
    source: EntrySource,
    sink: ZipSink,
    chunk_size: usize,
) {
    if let Err(err) = write_entries(&inner, source, sink, chunk_size).await {
        terminate(&inner, Termination::Failed(err));
    }
}

async fn write_entries(
    inner: &Rc<RefCell<Inner>>,
    mut source: EntrySource,
    mut sink: ZipSink,
    chunk_size: usize,
) -> Result<()> {
    while source.has_next() {
        if is_closed(inner) {
            return Ok(());
        }

        let entry = source.next_entry()?;
        let name = entry.name().to_string();
        let modified = entry.modified();
        tracing::debug!(entry = %name, "opening entry");

        let mut job = run_blocking(move || {
            let reader = entry
                .open()
                .map_err(|err| ArchiveError::source_failed(&name, err))?;
            sink.start_entry_at(&name, modified)?;
            Ok(EntryJob {
                name,
                sink,
                reader,
                chunk: vec![0u8; chunk_size],
            })
        })
        .await?;

        loop {
            // Dropping the job here closes the entry's stream
            if is_closed(inner) {
                return Ok(());
            }
            let (next, done) = run_blocking(move || {
                let done = job.step()?;
                Ok((job, done))
            })
            .await?;
            job = next;
            if done {
                break;
            }
        }

        let EntryJob { name, sink: next_sink, .. } = job;
        sink = next_sink;
        inner.borrow_mut().entries_written += 1;
        tracing::debug!(entry = %name, "entry written");
    }

    if is_closed(inner) {
        return Ok(());
    }
    run_blocking(move || {
        sink.finish()?.complete();
        Ok(())
    })
    .await?;
    tracing::debug!("archive finalized");
    Ok(())
}

fn arm_flush(inner: &Rc<RefCell<Inner>>) {
    {
        let mut guard = inner.borrow_mut();
        if !guard.started || guard.flushing || guard.state != GeneratorState::Active {
            return;
        }
        guard.flushing = true;
    }
    task::spawn_local(flush_loop(Rc::clone(inner)));
}

async fn flush_loop(inner: Rc<RefCell<Inner>>) {
    let buffer = inner.borrow().buffer.clone();
    loop {
        {
            let mut guard = inner.borrow_mut();
            if guard.state != GeneratorState::Active {
                guard.flushing = false;
                return;
            }
        }

        // Read completion first: once set, `available` covers every byte
        let complete = buffer.is_complete();
        if buffer.available() > 0 {
            deliver(&inner, buffer.take());
            task::yield_now().await;
        } else if complete {
            terminate(&inner, Termination::Finished);
            return;
        } else {
            buffer.readable().await;
        }
    }
}

fn deliver(inner: &Rc<RefCell<Inner>>, chunk: Bytes) {
    let handler = inner.borrow_mut().on_data.take();
    let Some(mut handler) = handler else {
        tracing::warn!(bytes = chunk.len(), "no data handler attached, chunk dropped");
        return;
    };

    let len = chunk.len() as u64;
    // Not borrowed: the handler may call back into the generator
    handler(chunk);

    let mut guard = inner.borrow_mut();
    guard.bytes_emitted += len;
    if guard.on_data.is_none() && guard.state != GeneratorState::Closed {
        guard.on_data = Some(handler);
    }
}

fn terminate(inner: &Rc<RefCell<Inner>>, outcome: Termination) {
    let (on_error, on_end, buffer, bytes, entries) = {
        let mut guard = inner.borrow_mut();
        if guard.state == GeneratorState::Closed {
            if let Termination::Failed(err) = &outcome {
                tracing::debug!(error = %err, "error after close ignored");
            }
            return;
        }
        guard.state = GeneratorState::Closed;
        guard.flushing = false;
        guard.on_data = None;
        guard.source = None;
        guard.sink = None;
        (
            guard.on_error.take(),
            guard.on_end.take(),
            guard.buffer.clone(),
            guard.bytes_emitted,
            guard.entries_written,
        )
    };

    match outcome {
        Termination::Finished => {
            drop(on_error);
            tracing::info!(entries, bytes, "archive complete");
            if let Some(on_end) = on_end {
                on_end();
            }
        }
        Termination::Failed(err) => {
            drop(on_end);
            // Undelivered bytes are discarded; a blocked worker fails fast
            buffer.close();

            let cancelled = matches!(err, ArchiveError::Cancelled);
            if cancelled {
                tracing::debug!(entries, bytes, "generator closed by consumer");
            } else {
                tracing::error!(error = %err, entries, bytes, "archive generation failed");
            }
            match on_error {
                Some(on_error) => on_error(err),
                None if cancelled => {}
                None => tracing::warn!(error = %err, "no error handler attached"),
            }
        }
    }
}

async fn idle_watchdog(inner: Weak<RefCell<Inner>>, epoch: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let abandoned = {
        let guard = inner.borrow();
        guard.state == GeneratorState::Paused && guard.pause_epoch == epoch
    };
    if abandoned {
        tracing::warn!(?timeout, "generator paused past idle timeout, closing");
        terminate(&inner, Termination::Failed(ArchiveError::Abandoned(timeout)));
    }
}
