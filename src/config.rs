//! Logging configuration.
//!
//! A [`LogConfig`] is built once at startup and then only read. Every
//! component takes it by reference; nothing in this crate mutates it.

use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;

use serde::Deserialize;

use crate::event::EventKind;

/// Output format for syslog and log file sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `key=value ; key=value` summary lines
    #[default]
    Sudo,
    /// Structured JSON records
    Json,
}

/// The set of sinks enabled for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SinkSet {
    /// Write to the system log
    #[serde(default)]
    pub syslog: bool,
    /// Write to the log file at [`LogConfig::log_path`]
    #[serde(default)]
    pub file: bool,
    /// Honor requests to notify by mail
    #[serde(default)]
    pub mail: bool,
}

impl Default for SinkSet {
    fn default() -> Self {
        Self {
            syslog: true,
            file: false,
            mail: true,
        }
    }
}

/// Syslog severity used for an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// System is unusable
    Emerg,
    /// Action must be taken immediately
    Alert,
    /// Critical conditions
    Crit,
    /// Error conditions
    Err,
    /// Warning conditions
    Warning,
    /// Normal but significant condition
    Notice,
    /// Informational
    Info,
    /// Debug-level messages
    Debug,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emerg => "emerg",
            Self::Alert => "alert",
            Self::Crit => "crit",
            Self::Err => "err",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Syslog facility the messages are filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SyslogFacility {
    Auth,
    #[default]
    Authpriv,
    Daemon,
    User,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl From<SyslogFacility> for syslog::Facility {
    fn from(facility: SyslogFacility) -> Self {
        match facility {
            SyslogFacility::Auth => syslog::Facility::LOG_AUTH,
            SyslogFacility::Authpriv => syslog::Facility::LOG_AUTHPRIV,
            SyslogFacility::Daemon => syslog::Facility::LOG_DAEMON,
            SyslogFacility::User => syslog::Facility::LOG_USER,
            SyslogFacility::Local0 => syslog::Facility::LOG_LOCAL0,
            SyslogFacility::Local1 => syslog::Facility::LOG_LOCAL1,
            SyslogFacility::Local2 => syslog::Facility::LOG_LOCAL2,
            SyslogFacility::Local3 => syslog::Facility::LOG_LOCAL3,
            SyslogFacility::Local4 => syslog::Facility::LOG_LOCAL4,
            SyslogFacility::Local5 => syslog::Facility::LOG_LOCAL5,
            SyslogFacility::Local6 => syslog::Facility::LOG_LOCAL6,
            SyslogFacility::Local7 => syslog::Facility::LOG_LOCAL7,
        }
    }
}

/// Settings for the administrator notification mail.
///
/// Mail is disabled when either `mailer_path` or `mailto` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MailConfig {
    /// Path to the mailer binary
    #[serde(default = "default_mailer_path")]
    pub mailer_path: Option<PathBuf>,
    /// Flags passed to the mailer, split on spaces and tabs
    #[serde(default = "default_mailer_flags")]
    pub mailer_flags: String,
    /// Recipient address
    #[serde(default = "default_mailto")]
    pub mailto: Option<String>,
    /// Sender address; the submitting user when unset
    #[serde(default)]
    pub mailfrom: Option<String>,
    /// Subject template; `%h` expands to the host and `%u` to the user
    #[serde(default = "default_mail_subject")]
    pub subject: String,
    /// User id the mailer runs as
    #[serde(default)]
    pub mail_uid: u32,
}

impl MailConfig {
    /// Returns `true` if both a mailer and a recipient are configured.
    pub fn is_enabled(&self) -> bool {
        self.mailer_path.is_some() && self.mailto.is_some()
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            mailer_path: default_mailer_path(),
            mailer_flags: default_mailer_flags(),
            mailto: default_mailto(),
            mailfrom: None,
            subject: default_mail_subject(),
            mail_uid: 0,
        }
    }
}

/// Process-wide logging configuration.
///
/// # Examples
///
/// ```
/// use eventlog::{LogConfig, LogFormat, Priority, SinkSet};
///
/// let config = LogConfig::default()
///     .with_format(LogFormat::Json)
///     .with_sinks(SinkSet { syslog: false, file: true, mail: false })
///     .with_log_path("/var/log/sudo.json");
///
/// assert_eq!(config.format, LogFormat::Json);
/// assert_eq!(config.accept_priority, Some(Priority::Notice));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// Output format for syslog and file sinks
    #[serde(default)]
    pub format: LogFormat,
    /// Enabled sinks
    #[serde(default)]
    pub sinks: SinkSet,
    /// Maximum length of one syslog message
    #[serde(default = "default_syslog_maxlen")]
    pub syslog_maxlen: usize,
    /// Width at which log file lines are wrapped; 0 disables wrapping
    #[serde(default = "default_file_maxlen")]
    pub file_maxlen: usize,
    /// Path of the log file sink
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Identifier attached to syslog messages
    #[serde(default = "default_syslog_ident")]
    pub syslog_ident: String,
    /// Syslog facility
    #[serde(default)]
    pub syslog_facility: SyslogFacility,
    /// Priority for accept and exit events; `None` disables them in syslog
    #[serde(default = "default_accept_priority")]
    pub accept_priority: Option<Priority>,
    /// Priority for reject events; `None` disables them in syslog
    #[serde(default = "default_reject_priority")]
    pub reject_priority: Option<Priority>,
    /// Priority for alert events; `None` disables them in syslog
    #[serde(default = "default_alert_priority")]
    pub alert_priority: Option<Priority>,
    /// strftime-style format for human readable times
    #[serde(default = "default_time_fmt")]
    pub time_fmt: String,
    /// Leave `HOST=` out of summary lines
    #[serde(default)]
    pub omit_hostname: bool,
    /// Descriptors the mail daemon must keep open (debug traces)
    #[serde(default)]
    pub preserved_fds: Vec<RawFd>,
    /// Mail relay settings
    #[serde(default)]
    pub mail: MailConfig,
}

impl LogConfig {
    /// Sets the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the enabled sinks.
    pub fn with_sinks(mut self, sinks: SinkSet) -> Self {
        self.sinks = sinks;
        self
    }

    /// Sets the log file path.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Sets the maximum syslog message length.
    pub fn with_syslog_maxlen(mut self, maxlen: usize) -> Self {
        self.syslog_maxlen = maxlen;
        self
    }

    /// Sets the log file wrap width.
    pub fn with_file_maxlen(mut self, maxlen: usize) -> Self {
        self.file_maxlen = maxlen;
        self
    }

    /// Sets the time format string.
    pub fn with_time_fmt(mut self, fmt: impl Into<String>) -> Self {
        self.time_fmt = fmt.into();
        self
    }

    /// Omits the submitting host from summary lines.
    pub fn with_omit_hostname(mut self, omit: bool) -> Self {
        self.omit_hostname = omit;
        self
    }

    /// Replaces the mail settings.
    pub fn with_mail(mut self, mail: MailConfig) -> Self {
        self.mail = mail;
        self
    }

    /// Returns the syslog priority for `kind`, or `None` if syslog is
    /// disabled for that event type.
    pub fn priority_for(&self, kind: EventKind) -> Option<Priority> {
        match kind {
            EventKind::Accept | EventKind::Exit => self.accept_priority,
            EventKind::Reject => self.reject_priority,
            EventKind::Alert => self.alert_priority,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            sinks: SinkSet::default(),
            syslog_maxlen: default_syslog_maxlen(),
            file_maxlen: default_file_maxlen(),
            log_path: default_log_path(),
            syslog_ident: default_syslog_ident(),
            syslog_facility: SyslogFacility::default(),
            accept_priority: default_accept_priority(),
            reject_priority: default_reject_priority(),
            alert_priority: default_alert_priority(),
            time_fmt: default_time_fmt(),
            omit_hostname: false,
            preserved_fds: Vec::new(),
            mail: MailConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_syslog_maxlen() -> usize {
    960
}

fn default_file_maxlen() -> usize {
    80
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/sudo.log")
}

fn default_syslog_ident() -> String {
    "sudo".to_string()
}

fn default_accept_priority() -> Option<Priority> {
    Some(Priority::Notice)
}

fn default_reject_priority() -> Option<Priority> {
    Some(Priority::Alert)
}

fn default_alert_priority() -> Option<Priority> {
    Some(Priority::Alert)
}

fn default_time_fmt() -> String {
    "%h %e %T".to_string()
}

fn default_mailer_path() -> Option<PathBuf> {
    Some(PathBuf::from("/usr/sbin/sendmail"))
}

fn default_mailer_flags() -> String {
    "-t".to_string()
}

fn default_mailto() -> Option<String> {
    Some("root".to_string())
}

fn default_mail_subject() -> String {
    "*** SECURITY information for %h ***".to_string()
}
