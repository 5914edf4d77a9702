//! Audit event logging for privilege brokers.
//!
//! Every decision a privilege broker makes (a command accepted or rejected,
//! an alert, a command exiting) is written to up to three independent
//! sinks:
//! - **syslog**: summary lines split to fit the message limit, or a compact
//!   `@cee:` JSON record
//! - **log file**: wrapped summary lines, or a single JSON object grown one
//!   record at a time under an exclusive lock
//! - **mail**: a notification piped to the configured mailer from a detached
//!   process tree
//!
//! # Core Types
//!
//! - [`EventLog`]: the dispatcher with one entry point per event kind
//! - [`EventRecord`]: everything known about one invocation
//! - [`LogConfig`]: immutable configuration shared by all sinks
//! - [`SyslogSink`]: system log destination, [`UnixSyslog`] or the in-memory
//!   [`MemorySyslog`]
//!
//! # Examples
//!
//! ```
//! use eventlog::{EventFlags, EventLog, EventRecord, LogConfig, LogFormat, SinkSet, MemorySyslog};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = LogConfig::default()
//!     .with_format(LogFormat::Json)
//!     .with_sinks(SinkSet { syslog: false, file: true, mail: false })
//!     .with_log_path(dir.path().join("sudo.json"));
//! let syslog = MemorySyslog::new();
//! let log = EventLog::new(&config, &syslog);
//!
//! let record = EventRecord {
//!     command: Some("/usr/bin/id".to_string()),
//!     ..EventRecord::new("alice")
//! };
//! assert!(log.accept(&record, EventFlags::NONE, None));
//!
//! let text = std::fs::read_to_string(&config.log_path).unwrap();
//! let value: serde_json::Value = serde_json::from_str(&text).unwrap();
//! assert_eq!(value["accept"]["command"], "/usr/bin/id");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatch;
mod error;
mod event;
mod logging;
mod record;
mod timefmt;

pub mod json;
pub mod logfile;
pub mod logline;
pub mod mail;
pub mod sink;

pub use config::{LogConfig, LogFormat, MailConfig, Priority, SinkSet, SyslogFacility};
pub use dispatch::EventLog;
pub use error::{ErrorKind, EventLogError, Result};
pub use event::{EventArgs, EventFlags, EventKind};
pub use mail::{MailError, MailRelay, Stage};
pub use record::{EventRecord, Timespec};
pub use sink::{MemorySyslog, SyslogMessage, SyslogSink, UnixSyslog};
