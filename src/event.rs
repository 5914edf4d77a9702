//! Event kinds, dispatch flags and per-call arguments.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::json::JsonInfo;
use crate::record::Timespec;

/// Kind of decision being logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A command was allowed to run
    Accept,
    /// A command was refused
    Reject,
    /// A problem the administrator should hear about
    Alert,
    /// A command finished
    Exit,
}

impl EventKind {
    /// Key wrapping the record in JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Accept => "accept",
            EventKind::Reject => "reject",
            EventKind::Alert => "alert",
            EventKind::Exit => "exit",
        }
    }

    /// Key under which the caller-supplied event time is stored in JSON.
    pub fn time_key(&self) -> &'static str {
        match self {
            EventKind::Accept | EventKind::Reject => "submit_time",
            EventKind::Alert => "alert_time",
            EventKind::Exit => "exit_time",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags modifying how one event is dispatched.
///
/// # Examples
///
/// ```
/// use eventlog::EventFlags;
///
/// let flags = EventFlags::MAIL | EventFlags::RAW;
/// assert!(flags.contains(EventFlags::MAIL));
/// assert!(!flags.contains(EventFlags::MAIL_ONLY));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags(u8);

impl EventFlags {
    /// No flags.
    pub const NONE: EventFlags = EventFlags(0);
    /// Log the reason only, without record fields.
    pub const RAW: EventFlags = EventFlags(0x01);
    /// Also notify the administrator by mail.
    pub const MAIL: EventFlags = EventFlags(0x02);
    /// Notify by mail and skip syslog and file output.
    pub const MAIL_ONLY: EventFlags = EventFlags(0x04);

    /// Returns `true` if every flag in `other` is set.
    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if mail was requested, directly or via `MAIL_ONLY`.
    pub fn wants_mail(self) -> bool {
        self.contains(Self::MAIL) || self.contains(Self::MAIL_ONLY)
    }

    /// Returns `true` if record fields should be left out.
    pub fn is_raw(self) -> bool {
        self.contains(Self::RAW)
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: EventFlags) {
        self.0 |= rhs.0;
    }
}

/// Arguments built by the dispatcher for one call.
#[derive(Clone, Copy, Default)]
pub struct EventArgs<'a> {
    /// Why the event happened
    pub reason: Option<&'a str>,
    /// Error detail accompanying the reason
    pub errstr: Option<&'a str>,
    /// When the event happened, as reported by the caller
    pub event_time: Option<Timespec>,
    /// Extra JSON fields; the record dump is used when unset
    pub info: Option<&'a dyn JsonInfo>,
}

impl<'a> EventArgs<'a> {
    /// Sets the reason.
    pub fn with_reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Sets the error detail.
    pub fn with_errstr(mut self, errstr: &'a str) -> Self {
        self.errstr = Some(errstr);
        self
    }

    /// Sets the event time.
    pub fn with_event_time(mut self, time: Timespec) -> Self {
        self.event_time = Some(time);
        self
    }

    /// Sets the extra JSON info provider.
    pub fn with_info(mut self, info: &'a dyn JsonInfo) -> Self {
        self.info = Some(info);
        self
    }
}

impl fmt::Debug for EventArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventArgs")
            .field("reason", &self.reason)
            .field("errstr", &self.errstr)
            .field("event_time", &self.event_time)
            .field("info", &self.info.map(|_| "<custom>"))
            .finish()
    }
}
