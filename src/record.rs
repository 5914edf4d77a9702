//! The event record supplied by the policy engine.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{EventLogError, Result};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A point in time or a duration, as seconds plus nanoseconds.
///
/// A zero value means "not set" for the optional time fields of an
/// [`EventRecord`] (`run_time`, `iolog_offset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    /// Whole seconds
    pub seconds: i64,
    /// Sub-second part, always below one billion
    pub nanoseconds: u32,
}

impl Timespec {
    /// Creates a timespec, carrying excess nanoseconds into seconds.
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self {
            seconds: seconds.saturating_add(i64::from(nanoseconds / NANOS_PER_SEC)),
            nanoseconds: nanoseconds % NANOS_PER_SEC,
        }
    }

    /// Reads the real-time clock.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Clock`] if the clock reads before the epoch.
    pub fn now() -> Result<Self> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::from)
            .map_err(|_| EventLogError::Clock)
    }

    /// Returns `true` if either component is non-zero.
    pub fn is_set(&self) -> bool {
        self.seconds != 0 || self.nanoseconds != 0
    }
}

impl From<Duration> for Timespec {
    fn from(duration: Duration) -> Self {
        Self {
            seconds: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            nanoseconds: duration.subsec_nanos(),
        }
    }
}

impl std::ops::Add for Timespec {
    type Output = Timespec;

    fn add(self, rhs: Timespec) -> Timespec {
        // Either side may be unnormalized.
        let nanos = u64::from(self.nanoseconds) + u64::from(rhs.nanoseconds);
        let carry = i64::try_from(nanos / u64::from(NANOS_PER_SEC)).unwrap_or(i64::MAX);
        Timespec {
            seconds: self
                .seconds
                .saturating_add(rhs.seconds)
                .saturating_add(carry),
            nanoseconds: (nanos % u64::from(NANOS_PER_SEC)) as u32,
        }
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// Everything known about one privilege-broker invocation.
///
/// The record is owned by the caller and only read by this crate.
///
/// # Example
///
/// ```
/// use eventlog::EventRecord;
///
/// let record = EventRecord {
///     submit_host: Some("myhost".to_string()),
///     tty_name: Some("/dev/pts/3".to_string()),
///     command: Some("/bin/ls".to_string()),
///     argv: vec!["ls".to_string(), "-la".to_string()],
///     ..EventRecord::new("alice")
/// };
///
/// assert_eq!(record.submit_user, "alice");
/// assert_eq!(record.exit_value, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    /// User who invoked the broker
    pub submit_user: String,
    /// Host the request came from
    pub submit_host: Option<String>,
    /// Working directory at submit time
    pub submit_cwd: Option<String>,
    /// Time the request was submitted
    pub submit_time: Timespec,
    /// Terminal device, e.g. `/dev/pts/3`
    pub tty_name: Option<String>,
    /// Remote peer address, when relayed over the network
    pub peer_addr: Option<String>,
    /// Target user
    pub run_user: Option<String>,
    /// Target group
    pub run_group: Option<String>,
    /// Target user id, if resolved
    pub run_uid: Option<u32>,
    /// Target group id, if resolved
    pub run_gid: Option<u32>,
    /// Chroot directory for the command
    pub run_chroot: Option<String>,
    /// Working directory for the command
    pub run_cwd: Option<String>,
    /// How long the command ran; zero when unknown
    pub run_time: Timespec,
    /// Fully qualified command path
    pub command: Option<String>,
    /// Argument vector, including `argv[0]`
    pub argv: Vec<String>,
    /// Environment of the command
    pub envp: Vec<String>,
    /// Variables the user asked to add to the environment
    pub env_add: Vec<String>,
    /// Terminal rows
    pub lines: i32,
    /// Terminal columns
    pub columns: i32,
    /// Exit status of the command, if it exited normally
    pub exit_value: Option<i32>,
    /// Name of the signal that killed the command, e.g. `SEGV`
    pub signal_name: Option<String>,
    /// Whether the command dumped core
    pub dumped_core: bool,
    /// I/O log identifier: a session id like `00/00/01` or a free-form tag
    pub iolog_file: Option<String>,
    /// Full path of the I/O log
    pub iolog_path: Option<String>,
    /// Offset into the I/O log; zero when unset
    pub iolog_offset: Timespec,
    /// UUID correlating related events
    pub uuid: Option<String>,
}

impl EventRecord {
    /// Creates an empty record for `submit_user`.
    pub fn new(submit_user: impl Into<String>) -> Self {
        Self {
            submit_user: submit_user.into(),
            ..Self::default()
        }
    }

    /// Returns the time the command finished, if the run time is known.
    pub fn exit_time(&self) -> Option<Timespec> {
        self.run_time
            .is_set()
            .then(|| self.submit_time + self.run_time)
    }
}
