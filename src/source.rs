//! Entries and the single-pass content source the generator drains
//!
//! An [`Entry`] is a name plus a deferred opener: no bytes are produced until
//! the generator opens it on a worker thread. An [`EntrySource`] hands entries
//! out in order, exactly once.

use crate::error::{ArchiveError, Result};
use crate::writer::DosDateTime;
use bytes::Bytes;
use chrono::NaiveDateTime;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

/// Byte stream returned by [`Entry::open`]
pub type EntryReader = Box<dyn Read + Send>;

type Opener = Box<dyn FnOnce() -> io::Result<EntryReader> + Send>;

/// One named item destined for one slot in the archive
pub struct Entry {
    name: String,
    modified: DosDateTime,
    opener: Opener,
}

impl Entry {
    /// Create an entry from an opener that is called once, on a worker thread
    pub fn new<F, R>(name: impl Into<String>, open: F) -> Self
    where
        F: FnOnce() -> io::Result<R> + Send + 'static,
        R: Read + Send + 'static,
    {
        Self {
            name: name.into(),
            modified: DosDateTime::EPOCH,
            opener: Box::new(move || open().map(|reader| Box::new(reader) as EntryReader)),
        }
    }

    /// Entry backed by bytes already in memory
    pub fn from_bytes(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self::new(name, move || Ok(Cursor::new(content)))
    }

    /// Entry backed by generated text, such as a scaffolded source file
    pub fn from_text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::from_bytes(name, Bytes::from(content.into()))
    }

    /// Entry backed by a file on disk, opened lazily
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(name, move || File::open(path))
    }

    /// Stamp the entry with a modification time instead of the DOS epoch
    pub fn with_modified(mut self, modified: NaiveDateTime) -> Self {
        self.modified = DosDateTime::from_datetime(modified);
        self
    }

    /// Name of the entry inside the archive
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Modification time written to the entry headers
    pub fn modified(&self) -> DosDateTime {
        self.modified
    }

    /// Open the entry's byte stream. Blocking; call from a worker.
    pub fn open(self) -> io::Result<EntryReader> {
        (self.opener)()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Ordered, finite, single-pass supplier of entries
pub struct EntrySource {
    entries: Box<dyn Iterator<Item = Entry> + Send>,
    peeked: Option<Entry>,
}

impl EntrySource {
    /// Wrap any ordered collection of entries
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Entry>,
        I::IntoIter: Send + 'static,
    {
        Self {
            entries: Box::new(entries.into_iter()),
            peeked: None,
        }
    }

    /// Source with no entries; produces an archive holding only the end record
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Build a source from in-memory `(name, content)` pairs
    pub fn from_files<I, N, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<Bytes>,
    {
        let entries: Vec<Entry> = files
            .into_iter()
            .map(|(name, content)| Entry::from_bytes(name, content))
            .collect();
        Self::new(entries)
    }

    /// True if another entry is available
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.entries.next();
        }
        self.peeked.is_some()
    }

    /// Take the entry announced by the preceding `has_next()`
    ///
    /// Fails with [`ArchiveError::SourceExhausted`] unless `has_next()` just
    /// returned true.
    pub fn next_entry(&mut self) -> Result<Entry> {
        self.peeked.take().ok_or(ArchiveError::SourceExhausted)
    }
}

impl Iterator for EntrySource {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.has_next() {
            self.next_entry().ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrySource")
            .field("peeked", &self.peeked)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn read_all(entry: Entry) -> Vec<u8> {
        let mut out = Vec::new();
        entry.open().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_entries_come_out_in_order() {
        let mut source = EntrySource::from_files([("a.txt", "hello"), ("b.txt", "world")]);

        assert!(source.has_next());
        let a = source.next_entry().unwrap();
        assert_eq!(a.name(), "a.txt");
        assert_eq!(read_all(a), b"hello");

        assert!(source.has_next());
        assert_eq!(source.next_entry().unwrap().name(), "b.txt");

        assert!(!source.has_next());
    }

    #[test]
    fn test_next_entry_requires_has_next() {
        let mut source = EntrySource::from_files([("a.txt", "hello")]);
        assert!(matches!(
            source.next_entry(),
            Err(ArchiveError::SourceExhausted)
        ));

        assert!(source.has_next());
        source.next_entry().unwrap();
        assert!(matches!(
            source.next_entry(),
            Err(ArchiveError::SourceExhausted)
        ));
    }

    #[test]
    fn test_has_next_is_idempotent() {
        let mut source = EntrySource::from_files([("only.txt", "1")]);
        assert!(source.has_next());
        assert!(source.has_next());
        assert_eq!(source.next_entry().unwrap().name(), "only.txt");
        assert!(!source.has_next());
    }

    #[test]
    fn test_iterator_drains_once() {
        let source = EntrySource::from_files([("a", "1"), ("b", "2"), ("c", "3")]);
        let names: Vec<String> = source.map(|e| e.name().to_string()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_open_is_deferred() {
        let entry = Entry::new("boom.txt", || -> io::Result<Cursor<Vec<u8>>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"))
        });
        // constructing never touches the opener
        assert_eq!(entry.name(), "boom.txt");
        assert_eq!(entry.open().err().unwrap().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, b"on disk").unwrap();

        assert_eq!(read_all(Entry::from_path("data.txt", &path)), b"on disk");
    }

    #[test]
    fn test_with_modified() {
        let when = NaiveDate::from_ymd_opt(2021, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 8)
            .unwrap();
        let entry = Entry::from_text("a.txt", "x").with_modified(when);
        assert_eq!(entry.modified(), DosDateTime::from_datetime(when));
        assert_ne!(entry.modified(), DosDateTime::EPOCH);
    }
}
