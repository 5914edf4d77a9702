//! Log file sinks.
//!
//! Both appenders take an exclusive `flock(2)` lock right after opening the
//! file and hold it until the record is written. The JSON appender keeps the
//! file a single JSON object by overwriting its closing `\n}\n` on every
//! append; it assumes that tail is intact and has no repair path when it is
//! not.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::{Flock, FlockArg};

use crate::config::{LogConfig, LogFormat};
use crate::error::{EventLogError, Result};
use crate::record::{EventRecord, Timespec};
use crate::timefmt;

const LOG_FILE_MODE: u32 = 0o600;
const JSON_TAIL: &str = "\n}\n";
const INDENT: &str = "    ";
const INVALID_DATE: &str = "invalid date";

/// Opens and closes log files on behalf of the appenders.
pub trait LogFileOpener {
    /// Opens `path` for appending records in `format`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn open(&self, path: &Path, format: LogFormat) -> io::Result<File>;

    /// Closes a file returned by `open`.
    fn close(&self, file: File) {
        drop(file);
    }
}

/// Opens log files directly, creating them with mode `0600`.
///
/// Line logs are opened for appending; JSON logs for reading and writing so
/// their tail can be rewritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl LogFileOpener for SystemOpener {
    fn open(&self, path: &Path, format: LogFormat) -> io::Result<File> {
        let mut options = OpenOptions::new();
        match format {
            LogFormat::Sudo => options.append(true),
            LogFormat::Json => options.read(true).write(true),
        };
        options.create(true).mode(LOG_FILE_MODE).open(path)
    }
}

/// Writes one logical line, possibly wrapped over several physical lines.
pub trait LineWriter {
    /// Writes `line` to `out`, wrapping at `maxlen` columns.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    fn write_line(&self, out: &mut dyn Write, line: &str, maxlen: usize) -> io::Result<()>;
}

/// Word-wrapping line writer.
///
/// Lines are broken at the last space at or before `maxlen`, or at the first
/// space after it when there is none. Continuation lines are indented by four
/// spaces and wrapped four columns earlier. Widths too small to hold the
/// indent disable wrapping.
///
/// # Examples
///
/// ```
/// use eventlog::logfile::{LineWriter, WordWrap};
///
/// let mut out = Vec::new();
/// WordWrap.write_line(&mut out, "aaaa bbbb cccc", 10).unwrap();
/// assert_eq!(String::from_utf8(out).unwrap(), "aaaa bbbb\n    cccc\n");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct WordWrap;

impl WordWrap {
    fn break_at(text: &str, width: usize) -> Option<usize> {
        let bytes = text.as_bytes();
        if let Some(i) = bytes[..=width].iter().rposition(|&b| b == b' ') {
            if i > 0 {
                return Some(i);
            }
        }
        bytes[width..]
            .iter()
            .position(|&b| b == b' ')
            .map(|i| width + i)
    }
}

impl LineWriter for WordWrap {
    fn write_line(&self, out: &mut dyn Write, line: &str, maxlen: usize) -> io::Result<()> {
        if maxlen <= INDENT.len() {
            return writeln!(out, "{line}");
        }

        let mut rest = line;
        let mut indent = "";
        let mut width = maxlen;
        while rest.len() > width {
            let Some(end) = Self::break_at(rest, width) else {
                break;
            };
            writeln!(out, "{indent}{}", &rest[..end])?;
            rest = rest[end..].trim_start_matches(' ');
            if indent.is_empty() {
                indent = INDENT;
                width = maxlen - INDENT.len();
            }
        }
        if !rest.is_empty() {
            writeln!(out, "{indent}{rest}")?;
        }
        Ok(())
    }
}

/// The log file sink.
pub struct LogFile<'a> {
    config: &'a LogConfig,
    opener: &'a dyn LogFileOpener,
    writer: &'a dyn LineWriter,
}

impl<'a> LogFile<'a> {
    /// Creates a sink for `config.log_path`.
    pub fn new(
        config: &'a LogConfig,
        opener: &'a dyn LogFileOpener,
        writer: &'a dyn LineWriter,
    ) -> Self {
        Self {
            config,
            opener,
            writer,
        }
    }

    fn path(&self) -> &'a Path {
        &self.config.log_path
    }

    /// Opens and locks the log, runs `write`, then unlocks and closes it.
    fn with_locked<F>(&self, format: LogFormat, write: F) -> Result<()>
    where
        F: FnOnce(&mut File) -> Result<()>,
    {
        let path = self.path();
        let file = self
            .opener
            .open(path, format)
            .map_err(|e| EventLogError::io("open", path, e))?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusive) {
            Ok(lock) => lock,
            Err((file, errno)) => {
                self.opener.close(file);
                return Err(EventLogError::Lock {
                    path: path.to_path_buf(),
                    source: errno,
                });
            }
        };

        let result = write(&mut lock);

        match lock.unlock() {
            Ok(file) => self.opener.close(file),
            Err((lock, errno)) => {
                tracing::debug!(path = %path.display(), %errno, "unable to unlock log file");
                drop(lock);
            }
        }
        result
    }

    /// Appends `<time> : <user> : <line>`, or `<time> : <line>` without a
    /// record, wrapped by the configured line writer.
    ///
    /// The time is `event_time` in local time; a missing or unformattable
    /// time is written as `invalid date`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened, locked or written.
    pub fn append_line(
        &self,
        line: &str,
        record: Option<&EventRecord>,
        event_time: Option<Timespec>,
    ) -> Result<()> {
        let time = event_time.and_then(|ts| timefmt::format_local(ts, &self.config.time_fmt));
        let time = time.as_deref().unwrap_or(INVALID_DATE);
        let full_line = match record {
            Some(record) => format!("{time} : {} : {line}", record.submit_user),
            None => format!("{time} : {line}"),
        };

        let mut wrapped = Vec::new();
        self.writer
            .write_line(&mut wrapped, &full_line, self.config.file_maxlen)
            .map_err(|e| EventLogError::io("format", self.path(), e))?;

        self.with_locked(LogFormat::Sudo, |file| {
            file.write_all(&wrapped)
                .map_err(|e| EventLogError::io("write", self.path(), e))?;
            file.flush()
                .map_err(|e| EventLogError::io("flush", self.path(), e))
        })
    }

    /// Splices a JSON fragment into the log's top-level object.
    ///
    /// An empty file is started with `{`; otherwise the trailing `\n}\n` is
    /// overwritten with `,`. The fragment is followed by a fresh `\n}\n`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened, locked, positioned or written.
    pub fn append_json(&self, fragment: &str) -> Result<()> {
        self.with_locked(LogFormat::Json, |file| {
            let path = self.path();
            let size = file
                .metadata()
                .map_err(|e| EventLogError::io("stat", path, e))?
                .len();

            let lead = if size == 0 {
                '{'
            } else {
                file.seek(SeekFrom::End(-(JSON_TAIL.len() as i64)))
                    .map_err(|e| EventLogError::Seek {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                ','
            };

            let mut payload = String::new();
            payload
                .try_reserve_exact(1 + fragment.len() + JSON_TAIL.len())
                .map_err(|_| EventLogError::OutOfMemory {
                    context: "JSON log entry",
                })?;
            payload.push(lead);
            payload.push_str(fragment);
            payload.push_str(JSON_TAIL);

            file.write_all(payload.as_bytes())
                .map_err(|e| EventLogError::io("write", path, e))?;
            file.flush().map_err(|e| EventLogError::io("flush", path, e))
        })
    }
}

impl std::fmt::Debug for LogFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("path", &self.config.log_path)
            .finish_non_exhaustive()
    }
}
