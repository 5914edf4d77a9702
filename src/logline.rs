//! Summary line formatting.
//!
//! A summary line looks like
//! `reason ; HOST=myhost ; TTY=pts/3 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/ls -la`.
//! The line is measured with a dry run of the same writer that later fills
//! it, allocated once, and filled under a hard bound: writing past the
//! measured size is reported as [`EventLogError::Overflow`] and the partial
//! line is dropped.

use std::borrow::Cow;

use crate::config::LogConfig;
use crate::error::{EventLogError, Result};
use crate::event::{EventArgs, EventFlags, EventKind};
use crate::record::{EventRecord, Timespec};

const SEPARATOR: &str = " ; ";
const DEV_PREFIX: &str = "/dev/";

const HOST_LABEL: &str = "HOST=";
const TTY_LABEL: &str = "TTY=";
const CHROOT_LABEL: &str = "CHROOT=";
const CWD_LABEL: &str = "PWD=";
const USER_LABEL: &str = "USER=";
const GROUP_LABEL: &str = "GROUP=";
const TSID_LABEL: &str = "TSID=";
const ENV_LABEL: &str = "ENV=";
const COMMAND_LABEL: &str = "COMMAND=";
const SIGNAL_LABEL: &str = "SIGNAL=";
const EXIT_LABEL: &str = "EXIT=";

/// Returns `true` for session ids of the form `AA/BB/CC` (alphanumeric pairs).
fn is_session_id(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 8
        && b[2] == b'/'
        && b[5] == b'/'
        && [0, 1, 3, 4, 6, 7]
            .iter()
            .all(|&i| b[i].is_ascii_alphanumeric())
}

/// Derives the session tag written after `TSID=`.
///
/// Session ids like `ab/cd/ef` collapse to `abcdef`; anything else is used
/// as given.
///
/// # Examples
///
/// ```
/// use eventlog::logline::session_tag;
///
/// assert_eq!(session_tag("ab/cd/ef"), "abcdef");
/// assert_eq!(session_tag("mysession-1"), "mysession-1");
/// ```
pub fn session_tag(iolog_file: &str) -> Cow<'_, str> {
    if is_session_id(iolog_file) {
        Cow::Owned(iolog_file.chars().filter(|&c| c != '/').collect())
    } else {
        Cow::Borrowed(iolog_file)
    }
}

/// Formats the `@seconds[.hundredths]` suffix for an I/O log offset.
///
/// Fractions are kept to two digits and only when the sub-second part
/// exceeds 10ms. An unset offset yields an empty string.
pub fn offset_suffix(offset: Timespec) -> String {
    let offset = Timespec::new(offset.seconds, offset.nanoseconds);
    if offset.nanoseconds > 10_000_000 {
        format!("@{}.{:02}", offset.seconds, offset.nanoseconds / 10_000_000)
    } else if offset.seconds != 0 {
        format!("@{}", offset.seconds)
    } else {
        String::new()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Destination for the pieces of a summary line.
trait LineSink {
    fn push(&mut self, piece: &str) -> Result<()>;
}

/// Dry run: only counts bytes.
#[derive(Default)]
struct Measure(usize);

impl LineSink for Measure {
    fn push(&mut self, piece: &str) -> Result<()> {
        self.0 = self
            .0
            .checked_add(piece.len())
            .ok_or(EventLogError::OutOfMemory {
                context: "log line",
            })?;
        Ok(())
    }
}

/// A preallocated line that refuses to grow past its bound.
struct BoundedLine {
    buf: String,
    bound: usize,
}

impl BoundedLine {
    fn with_bound(bound: usize) -> Result<Self> {
        let mut buf = String::new();
        buf.try_reserve_exact(bound + 1)
            .map_err(|_| EventLogError::OutOfMemory {
                context: "log line",
            })?;
        Ok(Self { buf, bound })
    }
}

impl LineSink for BoundedLine {
    fn push(&mut self, piece: &str) -> Result<()> {
        if self.buf.len() + piece.len() > self.bound {
            return Err(EventLogError::Overflow {
                context: "log line",
            });
        }
        self.buf.push_str(piece);
        Ok(())
    }
}

/// The fields of one summary line, resolved from a record.
struct LineFields<'a> {
    reason: Option<&'a str>,
    errstr: Option<&'a str>,
    host: Option<&'a str>,
    tty: Option<&'a str>,
    chroot: Option<&'a str>,
    cwd: Option<&'a str>,
    user: Option<&'a str>,
    group: Option<&'a str>,
    tsid: Option<Cow<'a, str>>,
    offset: String,
    env_add: &'a [String],
    command: Option<&'a str>,
    args: &'a [String],
    signal: Option<&'a str>,
    exit: Option<String>,
}

impl<'a> LineFields<'a> {
    fn resolve(
        kind: EventKind,
        args: &EventArgs<'a>,
        record: &'a EventRecord,
        config: &LogConfig,
    ) -> Self {
        let tsid = present(&record.iolog_file).map(session_tag);
        let offset = if tsid.is_some() && record.iolog_offset.is_set() {
            offset_suffix(record.iolog_offset)
        } else {
            String::new()
        };
        let is_exit = kind == EventKind::Exit;

        Self {
            reason: args.reason,
            errstr: args.errstr,
            host: present(&record.submit_host).filter(|_| !config.omit_hostname),
            tty: present(&record.tty_name)
                .map(|tty| tty.strip_prefix(DEV_PREFIX).unwrap_or(tty)),
            chroot: present(&record.run_chroot),
            cwd: present(&record.run_cwd),
            user: present(&record.run_user),
            group: present(&record.run_group),
            tsid,
            offset,
            env_add: &record.env_add,
            command: present(&record.command),
            args: record.argv.get(1..).unwrap_or(&[]),
            signal: present(&record.signal_name).filter(|_| is_exit),
            exit: record
                .exit_value
                .filter(|&v| is_exit && v != -1)
                .map(|v| v.to_string()),
        }
    }

    fn write_to(&self, out: &mut impl LineSink) -> Result<()> {
        if let Some(reason) = self.reason {
            out.push(reason)?;
            out.push(if self.errstr.is_some() { " : " } else { SEPARATOR })?;
        }
        if let Some(errstr) = self.errstr {
            out.push(errstr)?;
            out.push(SEPARATOR)?;
        }

        let labeled = [
            (HOST_LABEL, self.host),
            (TTY_LABEL, self.tty),
            (CHROOT_LABEL, self.chroot),
            (CWD_LABEL, self.cwd),
            (USER_LABEL, self.user),
            (GROUP_LABEL, self.group),
        ];
        for (label, value) in labeled {
            if let Some(value) = value {
                out.push(label)?;
                out.push(value)?;
                out.push(SEPARATOR)?;
            }
        }

        if let Some(tsid) = &self.tsid {
            out.push(TSID_LABEL)?;
            out.push(tsid)?;
            out.push(&self.offset)?;
            out.push(SEPARATOR)?;
        }

        if let Some((first, rest)) = self.env_add.split_first() {
            out.push(ENV_LABEL)?;
            out.push(first)?;
            for var in rest {
                out.push(" ")?;
                out.push(var)?;
            }
            out.push(SEPARATOR)?;
        }

        // Fields from here on are joined with a leading separator.
        let mut open = false;
        if let Some(command) = self.command {
            out.push(COMMAND_LABEL)?;
            out.push(command)?;
            for arg in self.args {
                out.push(" ")?;
                out.push(arg)?;
            }
            open = true;
        }
        let trailing = [(SIGNAL_LABEL, self.signal), (EXIT_LABEL, self.exit.as_deref())];
        for (label, value) in trailing {
            if let Some(value) = value {
                if open {
                    out.push(SEPARATOR)?;
                }
                out.push(label)?;
                out.push(value)?;
                open = true;
            }
        }
        Ok(())
    }
}

/// Builds summary lines for the line-oriented sinks and for mail.
#[derive(Debug, Clone, Copy)]
pub struct LineFormatter<'c> {
    config: &'c LogConfig,
}

impl<'c> LineFormatter<'c> {
    /// Creates a formatter reading `config`.
    pub fn new(config: &'c LogConfig) -> Self {
        Self { config }
    }

    /// Formats the summary line for one event.
    ///
    /// With [`EventFlags::RAW`] or without a record only the reason is
    /// written, as `reason` or `reason: errstr`.
    ///
    /// # Errors
    ///
    /// - [`EventLogError::MissingField`] in raw mode without a reason
    /// - [`EventLogError::OutOfMemory`] if the line cannot be allocated
    /// - [`EventLogError::Overflow`] if filling exceeds the measured size
    ///
    /// # Examples
    ///
    /// ```
    /// use eventlog::{EventArgs, EventFlags, EventKind, EventRecord, LogConfig};
    /// use eventlog::logline::LineFormatter;
    ///
    /// let config = LogConfig::default();
    /// let record = EventRecord {
    ///     submit_host: Some("myhost".to_string()),
    ///     tty_name: Some("/dev/pts/3".to_string()),
    ///     command: Some("/bin/ls".to_string()),
    ///     argv: vec!["ls".to_string(), "-la".to_string()],
    ///     ..EventRecord::new("alice")
    /// };
    /// let args = EventArgs::default().with_reason("no matching rule");
    ///
    /// let line = LineFormatter::new(&config)
    ///     .format(EventKind::Reject, EventFlags::NONE, &args, Some(&record))
    ///     .unwrap();
    /// assert_eq!(line, "no matching rule ; HOST=myhost ; TTY=pts/3 ; COMMAND=/bin/ls -la");
    /// ```
    pub fn format(
        &self,
        kind: EventKind,
        flags: EventFlags,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
    ) -> Result<String> {
        let record = match record {
            Some(record) if !flags.is_raw() => record,
            _ => return raw_line(args),
        };

        let fields = LineFields::resolve(kind, args, record, self.config);

        let mut measure = Measure::default();
        fields.write_to(&mut measure)?;

        let mut line = BoundedLine::with_bound(measure.0)?;
        fields.write_to(&mut line)?;
        Ok(line.buf)
    }
}

fn raw_line(args: &EventArgs<'_>) -> Result<String> {
    match (args.reason, args.errstr) {
        (Some(reason), Some(errstr)) => Ok(format!("{reason}: {errstr}")),
        (Some(reason), None) => Ok(reason.to_string()),
        (None, _) => Err(EventLogError::MissingField("reason")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn alice() -> EventRecord {
        EventRecord {
            submit_host: Some("myhost".to_string()),
            tty_name: Some("/dev/pts/3".to_string()),
            command: Some("/bin/ls".to_string()),
            argv: vec!["ls".to_string(), "-la".to_string()],
            ..EventRecord::new("alice")
        }
    }

    fn format(
        config: &LogConfig,
        kind: EventKind,
        args: &EventArgs<'_>,
        record: &EventRecord,
    ) -> String {
        LineFormatter::new(config)
            .format(kind, EventFlags::NONE, args, Some(record))
            .expect("line formats")
    }

    #[test]
    fn session_tag_collapses_session_ids() {
        assert_eq!(session_tag("ab/cd/ef"), "abcdef");
        assert_eq!(session_tag("00/00/0A"), "00000A");
    }

    #[test]
    fn session_tag_keeps_free_form_tags() {
        assert_eq!(session_tag("mysession-1"), "mysession-1");
        assert_eq!(session_tag("ab/cd/ef/"), "ab/cd/ef/");
        assert_eq!(session_tag("a-/cd/ef"), "a-/cd/ef");
    }

    #[test]
    fn offset_suffix_precision() {
        assert_eq!(offset_suffix(Timespec::new(0, 0)), "");
        assert_eq!(offset_suffix(Timespec::new(12, 0)), "@12");
        assert_eq!(offset_suffix(Timespec::new(12, 10_000_000)), "@12");
        assert_eq!(offset_suffix(Timespec::new(12, 345_000_000)), "@12.34");
        assert_eq!(offset_suffix(Timespec::new(0, 50_000_000)), "@0.05");

        let unnormalized = Timespec {
            seconds: 0,
            nanoseconds: 3_300_000_000,
        };
        assert_eq!(offset_suffix(unnormalized), "@3.30");
    }

    #[test]
    fn reject_line_matches_fixture() {
        let config = LogConfig::default();
        let args = EventArgs::default().with_reason("no matching rule");
        let line = format(&config, EventKind::Reject, &args, &alice());
        assert_eq!(
            line,
            "no matching rule ; HOST=myhost ; TTY=pts/3 ; COMMAND=/bin/ls -la"
        );
    }

    #[test]
    fn reason_and_errstr_joined_with_colon() {
        let config = LogConfig::default();
        let args = EventArgs::default()
            .with_reason("problem with defaults")
            .with_errstr("unknown entry");
        let line = format(&config, EventKind::Alert, &args, &alice());
        assert!(line.starts_with("problem with defaults : unknown entry ; HOST=myhost"));
    }

    #[test]
    fn all_fields_in_fixed_order() {
        let config = LogConfig::default();
        let record = EventRecord {
            run_chroot: Some("/jail".to_string()),
            run_cwd: Some("/home/alice".to_string()),
            run_user: Some("root".to_string()),
            run_group: Some("wheel".to_string()),
            iolog_file: Some("00/00/01".to_string()),
            iolog_offset: Timespec::new(3, 500_000_000),
            env_add: vec!["FOO=1".to_string(), "BAR=2".to_string()],
            ..alice()
        };
        let line = format(&config, EventKind::Accept, &EventArgs::default(), &record);
        assert_eq!(
            line,
            "HOST=myhost ; TTY=pts/3 ; CHROOT=/jail ; PWD=/home/alice ; USER=root ; \
             GROUP=wheel ; TSID=000001@3.50 ; ENV=FOO=1 BAR=2 ; COMMAND=/bin/ls -la"
        );
    }

    #[test]
    fn omit_hostname_drops_host() {
        let config = LogConfig::default().with_omit_hostname(true);
        let line = format(&config, EventKind::Accept, &EventArgs::default(), &alice());
        assert_eq!(line, "TTY=pts/3 ; COMMAND=/bin/ls -la");
    }

    #[test]
    fn exit_fields_only_for_exit_events() {
        let config = LogConfig::default();
        let record = EventRecord {
            signal_name: Some("SEGV".to_string()),
            exit_value: Some(139),
            ..alice()
        };

        let accept = format(&config, EventKind::Accept, &EventArgs::default(), &record);
        assert!(!accept.contains("SIGNAL="));
        assert!(!accept.contains("EXIT="));

        let exit = format(&config, EventKind::Exit, &EventArgs::default(), &record);
        assert!(exit.ends_with("COMMAND=/bin/ls -la ; SIGNAL=SEGV ; EXIT=139"));
    }

    #[test]
    fn exit_without_status_omits_exit_field() {
        let config = LogConfig::default();
        let record = EventRecord {
            signal_name: Some("SEGV".to_string()),
            dumped_core: true,
            ..alice()
        };
        let line = format(&config, EventKind::Exit, &EventArgs::default(), &record);
        assert!(line.ends_with("SIGNAL=SEGV"));
        assert!(!line.contains("EXIT="));
    }

    #[test]
    fn exit_value_minus_one_omits_exit_field() {
        let config = LogConfig::default();
        let record = EventRecord {
            signal_name: Some("SEGV".to_string()),
            exit_value: Some(-1),
            ..alice()
        };
        let line = format(&config, EventKind::Exit, &EventArgs::default(), &record);
        assert!(line.ends_with("COMMAND=/bin/ls -la ; SIGNAL=SEGV"));
        assert!(!line.contains("EXIT="));
    }

    #[test]
    fn missing_command_leaves_trailing_separator() {
        let config = LogConfig::default();
        let record = EventRecord {
            command: None,
            ..alice()
        };
        let line = format(&config, EventKind::Accept, &EventArgs::default(), &record);
        assert_eq!(line, "HOST=myhost ; TTY=pts/3 ; ");
    }

    #[test]
    fn empty_fields_are_skipped() {
        let config = LogConfig::default();
        let record = EventRecord {
            run_user: Some(String::new()),
            iolog_file: Some(String::new()),
            ..alice()
        };
        let line = format(&config, EventKind::Accept, &EventArgs::default(), &record);
        assert!(!line.contains("USER="));
        assert!(!line.contains("TSID="));
    }

    #[test]
    fn raw_mode_uses_reason_only() {
        let config = LogConfig::default();
        let formatter = LineFormatter::new(&config);
        let args = EventArgs::default().with_reason("unable to open").with_errstr("EACCES");

        let raw = formatter
            .format(EventKind::Alert, EventFlags::RAW, &args, Some(&alice()))
            .unwrap();
        assert_eq!(raw, "unable to open: EACCES");

        let args = EventArgs::default().with_reason("x");
        let no_record = formatter
            .format(EventKind::Alert, EventFlags::NONE, &args, None)
            .unwrap();
        assert_eq!(no_record, "x");
    }

    #[test]
    fn raw_mode_without_reason_fails() {
        let config = LogConfig::default();
        let error = LineFormatter::new(&config)
            .format(EventKind::Alert, EventFlags::RAW, &EventArgs::default(), None)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn bounded_line_rejects_overflow() {
        let mut line = BoundedLine::with_bound(4).unwrap();
        line.push("abc").unwrap();
        let error = line.push("de").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Budget);
        assert_eq!(line.buf, "abc");
    }

    #[test]
    fn measured_bound_is_exact() {
        let config = LogConfig::default();
        let record = EventRecord {
            run_user: Some("root".to_string()),
            ..alice()
        };
        let args = EventArgs::default().with_reason("r");
        let fields = LineFields::resolve(EventKind::Reject, &args, &record, &config);
        let mut measure = Measure::default();
        fields.write_to(&mut measure).unwrap();
        let line = format(&config, EventKind::Reject, &args, &record);
        assert_eq!(measure.0, line.len());
    }
}
