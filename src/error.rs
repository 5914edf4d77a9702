use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::mail::MailError;

/// Errors that can occur while formatting or writing an event log record.
///
/// Every sink reports its own outcome; an error from one sink never stops
/// the dispatcher from attempting the others.
///
/// # Examples
///
/// ```
/// use eventlog::{ErrorKind, EventLogError};
///
/// let error = EventLogError::Overflow { context: "log line" };
/// assert_eq!(error.kind(), ErrorKind::Budget);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// Memory for a buffer could not be reserved.
    #[error("{context}: unable to allocate memory")]
    OutOfMemory {
        /// What was being built
        context: &'static str,
    },

    /// A fill step wrote past the size computed for it.
    #[error("internal error, {context} overflow")]
    Overflow {
        /// What was being built
        context: &'static str,
    },

    /// A field required for this output is missing from the record.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The real-time clock could not be read.
    #[error("unable to read the clock")]
    Clock,

    /// An I/O operation on a log file failed.
    #[error("unable to {op} {}: {source}", path.display())]
    Io {
        /// The operation that failed (open, write, flush, ...)
        op: &'static str,
        /// The log file involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The exclusive lock on a log file could not be taken.
    #[error("unable to lock log file {}: {source}", path.display())]
    Lock {
        /// The log file involved
        path: PathBuf,
        /// The underlying errno
        #[source]
        source: nix::errno::Errno,
    },

    /// Positioning before the closing `\n}\n` of a JSON log failed.
    #[error("unable to seek {}: {source}", path.display())]
    Seek {
        /// The log file involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A JSON value could not be rendered.
    #[error("unable to format JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The system log could not be reached.
    #[error("syslog: {0}")]
    Syslog(String),

    /// The mail relay failed before handing off to its daemon.
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl EventLogError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory { .. } => ErrorKind::Allocation,
            Self::Overflow { .. } => ErrorKind::Budget,
            Self::MissingField(_) | Self::Serialize(_) => ErrorKind::Invalid,
            Self::Clock => ErrorKind::Clock,
            Self::Io { .. } | Self::Lock { .. } | Self::Seek { .. } | Self::Syslog(_) => {
                ErrorKind::Io
            }
            Self::Mail(_) => ErrorKind::Subprocess,
        }
    }
}

/// Category of an [`EventLogError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A buffer could not be allocated.
    Allocation,
    /// A computed size bound was exceeded; indicates a budgeting bug.
    Budget,
    /// Opening, locking, seeking, writing or flushing a sink failed.
    Io,
    /// Forking or piping for the mail relay failed.
    Subprocess,
    /// The clock could not be read.
    Clock,
    /// The record lacks data needed for the requested output.
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation => write!(f, "allocation failure"),
            Self::Budget => write!(f, "internal budget overflow"),
            Self::Io => write!(f, "I/O error"),
            Self::Subprocess => write!(f, "subprocess failure"),
            Self::Clock => write!(f, "clock failure"),
            Self::Invalid => write!(f, "invalid record"),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EventLogError>;
