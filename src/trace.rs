//! Workload trace files.
//!
//! A trace is a plain text file with one concurrency value per line. Each
//! retained line becomes one timeslot, numbered from 0 in file order.
//!
//! # Format
//! ```text
//! # comments start with '#'
//! 4
//! 10
//!
//! 25
//! # ENDTRACE   <- everything after this marker is ignored
//! 99
//! ```
//!
//! Blank lines and comments do not consume a slot. Lines that do not parse as
//! a non-negative base-10 integer are reported with a warning and skipped.
//!
//! Two readers are provided:
//! - [`LazyTrace`] streams the file and re-opens it every time a fresh
//!   iteration starts, so a file that is appended to between runs is picked
//!   up as-is.
//! - [`InMemoryTrace`] drains a [`LazyTrace`] once and keeps the values.

use std::fs::File;
use std::io::{BufRead, BufReader, Split};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Marker that terminates a trace when found on a comment line.
const END_MARKER: &str = "ENDTRACE";

/// Errors that make a trace file unusable.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to open trace file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read trace file {} at line {line}: {source}", path.display())]
    Read {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Classification of a single trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLine {
    /// A concurrency value for the next slot.
    Value(u64),
    /// Blank line or comment.
    Skip,
    /// `# ENDTRACE` marker.
    End,
    /// Line that is neither a comment nor an integer.
    Invalid,
}

impl TraceLine {
    /// Classifies one line of a trace file (without its line terminator).
    pub fn parse(line: &str) -> Self {
        if line.starts_with('#') {
            if line.contains(END_MARKER) {
                return TraceLine::End;
            }
            return TraceLine::Skip;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return TraceLine::Skip;
        }

        match trimmed.parse::<u64>() {
            Ok(value) => TraceLine::Value(value),
            Err(_) => TraceLine::Invalid,
        }
    }
}

/// Streaming reader over a trace file.
///
/// The file is not opened until [`LazyTrace::iter`] is called. Every call
/// opens the file again from the start with a fresh line counter.
#[derive(Debug, Clone)]
pub struct LazyTrace {
    path: PathBuf,
}

impl LazyTrace {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the trace file and returns an iterator over its values.
    ///
    /// # Errors
    /// Returns [`TraceError::Open`] if the file is missing or unreadable.
    pub fn iter(&self) -> Result<TraceIter, TraceError> {
        let file = File::open(&self.path).map_err(|source| TraceError::Open {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = ?self.path, "Opened trace file");

        Ok(TraceIter {
            path: self.path.clone(),
            lines: BufReader::new(file).split(b'\n'),
            line_no: 0,
            skipped: 0,
            error: None,
            done: false,
        })
    }
}

/// Iterator produced by [`LazyTrace::iter`].
///
/// Holds a single line in memory at a time. The underlying file is closed
/// when the iterator is exhausted or dropped. A read error ends the
/// iteration and is kept for [`TraceIter::take_error`].
pub struct TraceIter {
    path: PathBuf,
    lines: Split<BufReader<File>>,
    line_no: usize,
    skipped: usize,
    error: Option<TraceError>,
    done: bool,
}

impl TraceIter {
    /// Number of lines rejected with a warning so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// 1-based number of the last line read.
    pub fn line_number(&self) -> usize {
        self.line_no
    }

    /// The read error that ended the iteration, if any.
    pub fn take_error(&mut self) -> Option<TraceError> {
        self.error.take()
    }

    fn finish(&mut self) -> Option<u64> {
        self.done = true;
        None
    }
}

impl Iterator for TraceIter {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.done {
            return None;
        }

        loop {
            let raw = match self.lines.next() {
                Some(Ok(raw)) => raw,
                Some(Err(source)) => {
                    warn!(
                        path = ?self.path,
                        line = self.line_no + 1,
                        error = %source,
                        "Error reading trace file, stopping"
                    );
                    self.error = Some(TraceError::Read {
                        path: self.path.clone(),
                        line: self.line_no + 1,
                        source,
                    });
                    return self.finish();
                }
                None => return self.finish(),
            };
            self.line_no += 1;

            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.strip_suffix('\r').unwrap_or(line),
                Err(_) => {
                    self.skipped += 1;
                    warn!(
                        path = ?self.path,
                        line = self.line_no,
                        "Skipping trace line that is not valid UTF-8"
                    );
                    continue;
                }
            };

            match TraceLine::parse(line) {
                TraceLine::Value(value) => return Some(value),
                TraceLine::Skip => continue,
                TraceLine::End => {
                    debug!(path = ?self.path, line = self.line_no, "Reached ENDTRACE marker");
                    return self.finish();
                }
                TraceLine::Invalid => {
                    self.skipped += 1;
                    warn!(
                        path = ?self.path,
                        line = self.line_no,
                        "Skipping trace line that cannot be parsed as integer"
                    );
                }
            }
        }
    }
}

/// A trace read fully into memory.
///
/// Can be iterated any number of times without touching the file again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryTrace {
    values: Vec<u64>,
    skipped: usize,
}

impl InMemoryTrace {
    /// Reads every value of the trace file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        Self::from_lazy(&LazyTrace::new(path))
    }

    /// Drains one fresh iteration of `trace`. A read error fails the whole
    /// load rather than yielding a truncated trace.
    pub fn from_lazy(trace: &LazyTrace) -> Result<Self, TraceError> {
        let mut iter = trace.iter()?;
        let values: Vec<u64> = iter.by_ref().collect();
        if let Some(e) = iter.take_error() {
            return Err(e);
        }
        let skipped = iter.skipped();

        info!(
            path = ?trace.path(),
            timeslots = values.len(),
            skipped_lines = skipped,
            "Trace loaded"
        );

        Ok(Self { values, skipped })
    }

    /// Builds a trace from values already in memory.
    pub fn from_values(values: Vec<u64>) -> Self {
        Self { values, skipped: 0 }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Lines rejected with a warning while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, u64>> {
        self.values.iter().copied()
    }
}

impl<'a> IntoIterator for &'a InMemoryTrace {
    type Item = u64;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
