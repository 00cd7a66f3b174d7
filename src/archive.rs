//! Archive streamer – writes rendered certificates into a ZIP stream as they
//! are produced.
//!
//! The sink only needs [`Write`]: entries are written with data descriptors,
//! so nothing is buffered beyond the entry currently being compressed. After
//! every append the writer is flushed so the bytes reach the sink before the
//! next render starts.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, ZipWriter};

use crate::error::{BatchError, BatchResult};

/// File name offered to the client for the whole batch.
pub const ARCHIVE_FILE_NAME: &str = "certificates.zip";

/// MIME type of the batch response body.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// `Content-Disposition` header value for the batch response.
pub fn content_disposition() -> String {
    format!("attachment; filename={ARCHIVE_FILE_NAME}")
}

/// Turn a recipient name into a safe, unique entry name.
///
/// Path separators and control characters become `_`; a name already used in
/// this archive gets a ` (n)` suffix.
#[derive(Debug, Default)]
pub struct EntryNamer {
    used: HashSet<String>,
}

impl EntryNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_name(&mut self, name: &str, extension: &str) -> String {
        let stem: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
            .collect();

        let mut candidate = format!("{stem}.{extension}");
        let mut n = 1;
        while self.used.contains(&candidate) {
            n += 1;
            candidate = format!("{stem} ({n}).{extension}");
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Counts bytes handed to the sink. Once closed, writes are accepted and
/// dropped so the zip writer can wind down without reaching the sink.
struct SinkGate<W> {
    inner: W,
    closed: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
}

impl<W: Write> Write for SinkGate<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(buf.len());
        }
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.inner.flush()
    }
}

/// One open ZIP encoding session bound to a sink.
///
/// [`ArchiveStreamer::finish`] consumes the session, so the trailer is written
/// exactly once and nothing can be appended after it.
pub struct ArchiveStreamer<W: Write> {
    zip: ZipWriter<StreamWriter<SinkGate<W>>>,
    options: SimpleFileOptions,
    namer: EntryNamer,
    entries: Vec<String>,
    closed: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
}

impl<W: Write> ArchiveStreamer<W> {
    /// Start a session with DEFLATE at the given level (1-9).
    pub fn open(sink: W, compression_level: i64) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let written = Arc::new(AtomicU64::new(0));
        let gate = SinkGate {
            inner: sink,
            closed: Arc::clone(&closed),
            written: Arc::clone(&written),
        };
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level.clamp(1, 9)));

        Self {
            zip: ZipWriter::new_stream(gate),
            options,
            namer: EntryNamer::new(),
            entries: Vec::new(),
            closed,
            written,
        }
    }

    /// Append one entry named after `name` and push its bytes to the sink.
    /// Returns the entry name actually used.
    pub fn append(&mut self, name: &str, extension: &str, bytes: &[u8]) -> BatchResult<String> {
        let entry = self.namer.entry_name(name, extension);
        self.zip.start_file(entry.as_str(), self.options)?;
        self.zip.write_all(bytes).map_err(BatchError::SinkWriteFailed)?;
        self.zip.flush().map_err(BatchError::SinkWriteFailed)?;
        log::debug!("appended {entry} ({} bytes)", bytes.len());
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Bytes handed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Write the central directory. Returns the entry names and the total
    /// number of bytes emitted.
    pub fn finish(self) -> BatchResult<(Vec<String>, u64)> {
        let mut writer = self.zip.finish()?;
        writer.flush().map_err(BatchError::SinkWriteFailed)?;
        Ok((self.entries, self.written.load(Ordering::Relaxed)))
    }

    /// Drop the session without a trailer. Whatever already reached the sink
    /// stays a truncated archive.
    pub fn abort(self) {
        self.closed.store(true, Ordering::Relaxed);
        log::debug!(
            "archive aborted after {} entries, {} bytes",
            self.entries.len(),
            self.bytes_written()
        );
        // Close the writer here so its drop does not try to finalize again.
        if let Err(e) = self.zip.finish() {
            log::debug!("discarded archive did not close cleanly: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn read_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn entries_keep_append_order() {
        let mut out = Vec::new();
        let mut streamer = ArchiveStreamer::open(&mut out, 6);
        streamer.append("Bob", "png", b"bob-bytes").unwrap();
        streamer.append("Alice", "png", b"alice-bytes").unwrap();
        let (names, written) = streamer.finish().unwrap();
        assert_eq!(names, vec!["Bob.png", "Alice.png"]);
        assert_eq!(written as usize, out.len());

        let entries = read_entries(&out);
        assert_eq!(entries[0], ("Bob.png".to_string(), b"bob-bytes".to_vec()));
        assert_eq!(entries[1], ("Alice.png".to_string(), b"alice-bytes".to_vec()));
    }

    #[test]
    fn empty_archive_is_valid() {
        let mut out = Vec::new();
        let (names, _) = ArchiveStreamer::open(&mut out, 6).finish().unwrap();
        assert!(names.is_empty());
        assert!(read_entries(&out).is_empty());
    }

    #[test]
    fn bytes_reach_the_sink_before_finish() {
        let mut out = Vec::new();
        let mut streamer = ArchiveStreamer::open(&mut out, 6);
        streamer.append("Alice", "png", &[7u8; 4096]).unwrap();
        assert!(streamer.bytes_written() > 0);
        streamer.finish().unwrap();
    }

    #[test]
    fn duplicate_names_get_distinct_entries() {
        let mut out = Vec::new();
        let mut streamer = ArchiveStreamer::open(&mut out, 6);
        for _ in 0..3 {
            streamer.append("Ann", "png", b"x").unwrap();
        }
        let (names, _) = streamer.finish().unwrap();
        assert_eq!(names, vec!["Ann.png", "Ann (2).png", "Ann (3).png"]);
        assert_eq!(read_entries(&out).len(), 3);
    }

    #[test]
    fn separators_are_neutralised() {
        let mut namer = EntryNamer::new();
        assert_eq!(namer.entry_name("../etc/passwd", "png"), ".._etc_passwd.png");
        assert_eq!(namer.entry_name("a\\b\tc", "png"), "a_b_c.png");
        assert_eq!(namer.entry_name("José Ñúñez", "png"), "José Ñúñez.png");
    }

    struct FailingSink {
        budget: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_surfaces_as_sink_write_failed() {
        let mut streamer = ArchiveStreamer::open(FailingSink { budget: 64 }, 1);
        let mut result = Ok(String::new());
        for i in 0..10 {
            result = streamer.append(&format!("n{i}"), "png", &[1u8; 512]);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(BatchError::SinkWriteFailed(_))));
        streamer.abort();
    }

    #[test]
    fn aborted_session_writes_no_trailer() {
        let mut out = Vec::new();
        let before_abort;
        {
            let mut streamer = ArchiveStreamer::open(&mut out, 6);
            streamer.append("Alice", "png", b"partial").unwrap();
            before_abort = streamer.bytes_written();
            streamer.abort();
        }
        assert!(!out.is_empty());
        assert_eq!(out.len() as u64, before_abort);
        assert!(zip::ZipArchive::new(Cursor::new(&out)).is_err());
    }

    #[test]
    fn closed_gate_swallows_writes() {
        let written = Arc::new(AtomicU64::new(0));
        let mut gate = SinkGate {
            inner: Vec::new(),
            closed: Arc::new(AtomicBool::new(true)),
            written: Arc::clone(&written),
        };
        assert_eq!(gate.write(b"central directory").unwrap(), 17);
        gate.flush().unwrap();
        assert!(gate.inner.is_empty());
        assert_eq!(written.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn abort_after_sink_failure_is_quiet() {
        let mut streamer = ArchiveStreamer::open(FailingSink { budget: 64 }, 1);
        let err = streamer.append("Alice", "png", &[1u8; 4096]).unwrap_err();
        assert!(matches!(err, BatchError::SinkWriteFailed(_)));
        let written = streamer.bytes_written();
        assert!(written <= 64);
        streamer.abort();
    }
}
