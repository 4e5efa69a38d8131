//! # zip-pump: Streaming ZIP Generator with Backpressure
//!
//! `zip-pump` turns an ordered collection of named content sources into a ZIP
//! archive and pushes the archive bytes to a consumer as they are produced.
//! Nothing is buffered beyond one bounded transfer buffer, and the consumer
//! controls the pace with `pause()` / `resume()`.
//!
//! ## Features
//!
//! - **Lazy sources**: entries are opened one at a time, only when the
//!   generator reaches them
//! - **Off-thread compression**: opening, reading and compressing run on
//!   tokio's blocking pool; the home context never blocks
//! - **Backpressure**: a paused generator delivers nothing and its worker
//!   stalls once the transfer buffer fills
//! - **Single outcome**: exactly one of the end or error callbacks fires
//! - **HTTP downloads** (`download` feature): a hyper body fed by a generator
//!
//! ## Quick Start
//!
//! ### Generating an archive
//!
//! ```no_run
//! use zip_pump::{ArchiveGenerator, Entry, EntrySource};
//!
//! # async fn run() {
//! let source = EntrySource::new(vec![
//!     Entry::from_text("README.md", "# demo\n"),
//!     Entry::from_path("data/report.csv", "/var/reports/latest.csv"),
//! ]);
//!
//! let generator = ArchiveGenerator::new(source);
//! generator.attach(
//!     |chunk| println!("{} archive bytes", chunk.len()),
//!     |err| eprintln!("archive failed: {err}"),
//!     || println!("done"),
//! );
//! # }
//! ```
//!
//! ### Writing a ZIP synchronously
//!
//! ```
//! use zip_pump::{StreamingZipReader, StreamingZipWriter};
//!
//! let mut writer = StreamingZipWriter::new(Vec::new());
//! writer.start_entry("file.txt")?;
//! writer.write_data(b"Hello, World!")?;
//! let zip_bytes = writer.finish()?;
//!
//! let mut reader = StreamingZipReader::from_bytes(zip_bytes)?;
//! assert_eq!(reader.read_entry_by_name("file.txt")?, b"Hello, World!");
//! # Ok::<(), zip_pump::ArchiveError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod generator;
pub mod reader;
pub mod source;
pub mod writer;

#[cfg(feature = "download")]
pub mod download;

pub use buffer::{TransferBuffer, TransferWriter};
pub use config::GeneratorConfig;
pub use error::{ArchiveError, Result};
pub use generator::{ArchiveGenerator, GeneratorState, WeakGenerator};
pub use reader::{StreamingZipReader, ZipEntry};
pub use source::{Entry, EntryReader, EntrySource};
pub use writer::{CompressionMethod, DosDateTime, StreamingZipWriter};

#[cfg(feature = "download")]
pub use download::{attachment_headers, download_zip, pump, ArchiveBody};
