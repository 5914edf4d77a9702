//! Event fan-out to the configured sinks.

use crate::config::{LogConfig, LogFormat};
use crate::error::Result;
use crate::event::{EventArgs, EventFlags, EventKind};
use crate::json::{JsonFormatter, JsonInfo, JsonStyle};
use crate::logfile::{LineWriter, LogFile, LogFileOpener, SystemOpener, WordWrap};
use crate::logging::EventTrace;
use crate::logline::LineFormatter;
use crate::mail::MailRelay;
use crate::record::{EventRecord, Timespec};
use crate::sink::{self, SyslogSink};

/// Entry point for logging policy decisions.
///
/// Every call writes the event to each enabled sink and returns `true` only
/// if all of them succeeded. A failing sink never stops the others from
/// being tried; the failure is reported through `tracing`.
///
/// # Examples
///
/// ```
/// use eventlog::{EventFlags, EventLog, EventRecord, LogConfig, MemorySyslog};
///
/// let config = LogConfig::default();
/// let syslog = MemorySyslog::new();
/// let log = EventLog::new(&config, &syslog);
///
/// let record = EventRecord {
///     submit_host: Some("myhost".to_string()),
///     tty_name: Some("/dev/pts/3".to_string()),
///     command: Some("/bin/ls".to_string()),
///     argv: vec!["ls".to_string(), "-la".to_string()],
///     ..EventRecord::new("alice")
/// };
///
/// assert!(log.reject(&record, EventFlags::NONE, "no matching rule", None));
/// assert_eq!(
///     syslog.texts(),
///     vec!["   alice : no matching rule ; HOST=myhost ; TTY=pts/3 ; COMMAND=/bin/ls -la"]
/// );
/// ```
pub struct EventLog<'a> {
    config: &'a LogConfig,
    syslog: &'a dyn SyslogSink,
    opener: &'a dyn LogFileOpener,
    writer: &'a dyn LineWriter,
}

impl<'a> EventLog<'a> {
    /// Creates a dispatcher writing syslog messages to `syslog` and log
    /// files through [`SystemOpener`] and [`WordWrap`].
    pub fn new(config: &'a LogConfig, syslog: &'a dyn SyslogSink) -> Self {
        Self {
            config,
            syslog,
            opener: &SystemOpener,
            writer: &WordWrap,
        }
    }

    /// Replaces the log file open/close hooks.
    pub fn with_opener(mut self, opener: &'a dyn LogFileOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Replaces the log file line writer.
    pub fn with_line_writer(mut self, writer: &'a dyn LineWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Logs an allowed command. The event time is the submit time.
    pub fn accept(
        &self,
        record: &EventRecord,
        flags: EventFlags,
        info: Option<&dyn JsonInfo>,
    ) -> bool {
        let args = EventArgs {
            event_time: Some(record.submit_time),
            info,
            ..EventArgs::default()
        };
        self.dispatch(EventKind::Accept, flags, args, Some(record))
    }

    /// Logs a refused command with the reason it was refused.
    pub fn reject(
        &self,
        record: &EventRecord,
        flags: EventFlags,
        reason: &str,
        info: Option<&dyn JsonInfo>,
    ) -> bool {
        let args = EventArgs {
            reason: Some(reason),
            event_time: Some(record.submit_time),
            info,
            ..EventArgs::default()
        };
        self.dispatch(EventKind::Reject, flags, args, Some(record))
    }

    /// Logs a problem, optionally tied to a record.
    pub fn alert(
        &self,
        record: Option<&EventRecord>,
        flags: EventFlags,
        time: Timespec,
        reason: &str,
        errstr: Option<&str>,
    ) -> bool {
        let args = EventArgs {
            reason: Some(reason),
            errstr,
            event_time: Some(time),
            info: None,
        };
        self.dispatch(EventKind::Alert, flags, args, record)
    }

    /// Logs the end of a command. The event time is submit time plus run
    /// time, when the run time is known.
    pub fn exit(&self, record: &EventRecord, flags: EventFlags) -> bool {
        let args = EventArgs {
            event_time: record.exit_time(),
            ..EventArgs::default()
        };
        self.dispatch(EventKind::Exit, flags, args, Some(record))
    }

    fn dispatch(
        &self,
        kind: EventKind,
        flags: EventFlags,
        args: EventArgs<'_>,
        record: Option<&EventRecord>,
    ) -> bool {
        let trace = EventTrace::new(kind, record);
        let sinks = self.config.sinks;
        let mail = flags.wants_mail() && sinks.mail;

        // The summary line is shared by line-format sinks and mail.
        let line = if self.config.format == LogFormat::Sudo || mail {
            match LineFormatter::new(self.config).format(kind, flags, &args, record) {
                Ok(line) => Some(line),
                Err(error) => {
                    trace.error(format_args!("unable to format log line: {error}"));
                    return false;
                }
            }
        } else {
            None
        };

        if let (true, Some(line)) = (mail, line.as_deref()) {
            if let Err(error) = MailRelay::new(self.config).send(record, line) {
                trace.warn(format_args!("unable to mail log line: {error}"));
            }
        }
        if flags.contains(EventFlags::MAIL_ONLY) {
            trace.debug(format_args!("mail only, skipping syslog and log file"));
            return true;
        }

        let line = line.as_deref().or(args.reason).unwrap_or("");
        let mut ok = true;
        if sinks.syslog {
            if let Err(error) = self.write_syslog(kind, &args, record, line) {
                trace.error(format_args!("syslog: {error}"));
                ok = false;
            }
        }
        if sinks.file {
            if let Err(error) = self.write_file(kind, &args, record, line) {
                trace.error(format_args!("log file: {error}"));
                ok = false;
            }
        }
        ok
    }

    fn write_syslog(
        &self,
        kind: EventKind,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
        line: &str,
    ) -> Result<()> {
        let Some(priority) = self.config.priority_for(kind) else {
            return Ok(());
        };
        match self.config.format {
            LogFormat::Sudo => {
                sink::write_line(self.syslog, priority, line, record, self.config.syslog_maxlen)
            }
            LogFormat::Json => {
                let fragment =
                    JsonFormatter::new(self.config).format(kind, args, record, JsonStyle::Compact)?;
                sink::write_json(self.syslog, priority, &fragment)
            }
        }
    }

    fn write_file(
        &self,
        kind: EventKind,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
        line: &str,
    ) -> Result<()> {
        let log_file = LogFile::new(self.config, self.opener, self.writer);
        match self.config.format {
            LogFormat::Sudo => log_file.append_line(line, record, args.event_time),
            LogFormat::Json => {
                let fragment =
                    JsonFormatter::new(self.config).format(kind, args, record, JsonStyle::Pretty)?;
                log_file.append_json(&fragment)
            }
        }
    }
}

impl std::fmt::Debug for EventLog<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}
