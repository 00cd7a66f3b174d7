//! Names reader – pulls recipient names out of a comma-separated file.
//!
//! Only the first field of each record matters and it is taken by position,
//! so a header row is just another name unless the caller opts into skipping
//! it. Quoting follows the usual CSV rules:
//! - `"` opens a quoted field only at the very start of a field
//! - `""` inside a quoted field is a literal quote
//! - quoted fields may contain commas and line breaks
//! - records end at `\n` or `\r\n`
//!
//! We use a small hand-written parser: the input is a single column of names
//! and the rules above cover what spreadsheet exports produce.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::{BatchError, BatchResult};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Lazy iterator over the non-empty first-column values of a CSV stream.
///
/// Yields names in row order. After the first error the iterator is fused.
pub struct NameReader<R> {
    reader: R,
    line_no: usize,
    skip_header: bool,
    records_seen: usize,
    finished: bool,
}

impl<R: BufRead> NameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            skip_header: false,
            records_seen: 0,
            finished: false,
        }
    }

    /// Drop the first record instead of treating it as a name.
    pub fn skip_header(mut self, skip: bool) -> Self {
        self.skip_header = skip;
        self
    }

    /// Read one full record, following quoted line breaks across lines.
    fn next_record(&mut self) -> BatchResult<Option<Vec<String>>> {
        let mut record = RecordParser::new(self.line_no + 1);
        let mut line = String::new();

        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).map_err(|e| {
                if e.kind() == io::ErrorKind::InvalidData {
                    BatchError::malformed(self.line_no + 1, "input is not valid UTF-8")
                } else {
                    BatchError::internal(format!("reading names file: {e}"))
                }
            })?;

            if read == 0 {
                return if record.in_progress() {
                    record.finish_at_eof().map(Some)
                } else {
                    Ok(None)
                };
            }

            self.line_no += 1;
            let text = if self.line_no == 1 {
                line.strip_prefix('\u{feff}').unwrap_or(&line)
            } else {
                line.as_str()
            };

            if record.feed(text, self.line_no)? {
                return Ok(Some(record.into_fields()));
            }
        }
    }
}

impl<R: BufRead> Iterator for NameReader<R> {
    type Item = BatchResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.next_record() {
                Ok(None) => self.finished = true,
                Ok(Some(fields)) => {
                    self.records_seen += 1;
                    if self.skip_header && self.records_seen == 1 {
                        continue;
                    }
                    match fields.into_iter().next() {
                        Some(name) if !name.is_empty() => return Some(Ok(name)),
                        _ => continue,
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Open a names file for lazy reading.
pub fn open_names(path: &Path, skip_header: bool) -> BatchResult<NameReader<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| BatchError::internal(format!("cannot open names file {}: {e}", path.display())))?;
    Ok(NameReader::new(BufReader::new(file)).skip_header(skip_header))
}

/// Read every name up front. Any parse error anywhere in the file fails the
/// whole call, so nothing has been emitted downstream yet.
pub fn read_names(path: &Path, skip_header: bool) -> BatchResult<Vec<String>> {
    open_names(path, skip_header)?.collect()
}

// ---------------------------------------------------------------------------
// Record parser
// ---------------------------------------------------------------------------

struct RecordParser {
    fields: Vec<String>,
    field: String,
    in_quotes: bool,
    /// A quoted field just closed; only a delimiter or record end may follow.
    after_quote: bool,
    /// Anything at all has been consumed for this record.
    started: bool,
    start_line: usize,
}

impl RecordParser {
    fn new(start_line: usize) -> Self {
        Self {
            fields: Vec::new(),
            field: String::new(),
            in_quotes: false,
            after_quote: false,
            started: false,
            start_line,
        }
    }

    fn in_progress(&self) -> bool {
        self.started
    }

    /// Consume one physical line. Returns `true` once the record is complete.
    fn feed(&mut self, line: &str, line_no: usize) -> BatchResult<bool> {
        if !self.started {
            self.start_line = line_no;
            self.started = true;
        }

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if self.in_quotes {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        self.field.push('"');
                    } else {
                        self.in_quotes = false;
                        self.after_quote = true;
                    }
                } else {
                    self.field.push(c);
                }
                continue;
            }

            match c {
                ',' => self.end_field(),
                '\n' => {
                    self.end_field();
                    return Ok(true);
                }
                '\r' if chars.peek() == Some(&'\n') => {}
                _ if self.after_quote => {
                    return Err(BatchError::malformed(
                        line_no,
                        format!("unexpected {c:?} after closing quote"),
                    ));
                }
                '"' if self.field.is_empty() => self.in_quotes = true,
                _ => self.field.push(c),
            }
        }

        // Line ended without a newline: only possible on the last line.
        Ok(false)
    }

    fn finish_at_eof(mut self) -> BatchResult<Vec<String>> {
        if self.in_quotes {
            return Err(BatchError::malformed(
                self.start_line,
                "unterminated quoted field",
            ));
        }
        self.end_field();
        Ok(self.fields)
    }

    fn end_field(&mut self) {
        self.fields.push(std::mem::take(&mut self.field));
        self.after_quote = false;
    }

    fn into_fields(self) -> Vec<String> {
        self.fields
    }
}
