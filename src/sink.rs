use std::cell::{Cell, RefCell};

use syslog::{Formatter3164, Logger, LoggerBackend};

use crate::config::{LogConfig, Priority};
use crate::error::{EventLogError, Result};
use crate::record::EventRecord;

/// Width of the right-aligned user column in syslog messages.
const USER_WIDTH: usize = 8;
/// Length of `" : "` following the user column.
const FIRST_OVERHEAD: usize = 3;
/// Length of `" : (command continued) "` following the user column.
const CONTINUED_OVERHEAD: usize = 23;

/// Destination for syslog messages.
///
/// `open` and `close` bracket every log call, including multi-message
/// writes; both must be idempotent.
pub trait SyslogSink {
    /// Prepares the sink for writing.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Syslog`] if the system log is unreachable.
    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Releases whatever `open` acquired.
    fn close(&self) {}

    /// Sends one message at `priority`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Syslog`] if the message could not be sent.
    fn send(&self, priority: Priority, message: &str) -> Result<()>;
}

type UnixLogger = Logger<LoggerBackend, Formatter3164>;

/// The local system log, reached over its Unix socket.
///
/// The connection is made by `open` and dropped by `close`.
pub struct UnixSyslog {
    formatter: Formatter3164,
    logger: RefCell<Option<UnixLogger>>,
}

impl UnixSyslog {
    /// Creates a sink tagged with the configured ident and facility.
    pub fn new(config: &LogConfig) -> Self {
        Self {
            formatter: Formatter3164 {
                facility: config.syslog_facility.into(),
                hostname: None,
                process: config.syslog_ident.clone(),
                pid: std::process::id(),
            },
            logger: RefCell::new(None),
        }
    }
}

impl std::fmt::Debug for UnixSyslog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSyslog")
            .field("process", &self.formatter.process)
            .field("connected", &self.logger.borrow().is_some())
            .finish()
    }
}

impl SyslogSink for UnixSyslog {
    fn open(&self) -> Result<()> {
        let mut logger = self.logger.borrow_mut();
        if logger.is_none() {
            let connected = syslog::unix(self.formatter.clone())
                .map_err(|e| EventLogError::Syslog(e.to_string()))?;
            *logger = Some(connected);
        }
        Ok(())
    }

    fn close(&self) {
        self.logger.borrow_mut().take();
    }

    fn send(&self, priority: Priority, message: &str) -> Result<()> {
        self.open()?;
        let mut guard = self.logger.borrow_mut();
        let Some(logger) = guard.as_mut() else {
            return Err(EventLogError::Syslog("not connected".to_string()));
        };
        let sent = match priority {
            Priority::Emerg => logger.emerg(message),
            Priority::Alert => logger.alert(message),
            Priority::Crit => logger.crit(message),
            Priority::Err => logger.err(message),
            Priority::Warning => logger.warning(message),
            Priority::Notice => logger.notice(message),
            Priority::Info => logger.info(message),
            Priority::Debug => logger.debug(message),
        };
        sent.map_err(|e| EventLogError::Syslog(e.to_string()))
    }
}

/// One message captured by [`MemorySyslog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    /// Priority the message was sent at
    pub priority: Priority,
    /// Message text
    pub text: String,
}

/// A syslog sink that keeps messages in memory.
///
/// Records open and close calls as well, so tests can check that writes
/// are bracketed.
///
/// # Examples
///
/// ```
/// use eventlog::{MemorySyslog, Priority, SyslogSink};
///
/// let sink = MemorySyslog::new();
/// sink.open().unwrap();
/// sink.send(Priority::Notice, "hello").unwrap();
/// sink.close();
///
/// assert_eq!(sink.texts(), vec!["hello"]);
/// assert_eq!(sink.open_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemorySyslog {
    messages: RefCell<Vec<SyslogMessage>>,
    opens: Cell<usize>,
    closes: Cell<usize>,
    failing: bool,
}

impl MemorySyslog {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink whose `send` always fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Returns the number of captured messages.
    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    /// Provides borrowed access to the captured messages.
    pub fn with_messages<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[SyslogMessage]) -> R,
    {
        f(&self.messages.borrow())
    }

    /// Returns copies of the captured message texts.
    pub fn texts(&self) -> Vec<String> {
        self.with_messages(|msgs| msgs.iter().map(|m| m.text.clone()).collect())
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.get()
    }

    /// Number of `close` calls so far.
    pub fn close_count(&self) -> usize {
        self.closes.get()
    }

    /// Consumes the sink, returning the captured messages.
    pub fn into_vec(self) -> Vec<SyslogMessage> {
        self.messages.into_inner()
    }
}

impl SyslogSink for MemorySyslog {
    fn open(&self) -> Result<()> {
        self.opens.set(self.opens.get() + 1);
        Ok(())
    }

    fn close(&self) {
        self.closes.set(self.closes.get() + 1);
    }

    fn send(&self, priority: Priority, message: &str) -> Result<()> {
        if self.failing {
            return Err(EventLogError::Syslog("sink unavailable".to_string()));
        }
        self.messages.borrow_mut().push(SyslogMessage {
            priority,
            text: message.to_string(),
        });
        Ok(())
    }
}

/// Bytes taken by the user column, which `{:>8}` pads by characters.
fn user_column_len(user: &str) -> usize {
    USER_WIDTH.saturating_sub(user.chars().count()) + user.len()
}

fn content_budget(maxlen: usize, overhead: usize, user: &str) -> usize {
    maxlen
        .saturating_sub(overhead + user_column_len(user))
        .max(1)
}

/// Byte index at which to cut `text` so the head fits in `budget` bytes.
fn cut_point(text: &str, budget: usize) -> usize {
    let window = &text.as_bytes()[..budget];
    if let Some(space) = window.iter().rposition(|&b| b == b' ').filter(|&i| i > 0) {
        return space;
    }
    let mut cut = budget;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == 0 {
        // A single character wider than the budget goes out whole.
        cut = text
            .char_indices()
            .nth(1)
            .map_or(text.len(), |(i, _)| i);
    }
    cut
}

/// Splits `line` into the content of consecutive syslog messages for
/// `user`.
///
/// The first chunk leaves room for `"{user:>8} : "`, later chunks for the
/// longer `"{user:>8} : (command continued) "` prefix. Lines are broken at
/// the last space inside the budget when there is one; spaces at the start
/// of a continuation are dropped.
///
/// # Examples
///
/// ```
/// use eventlog::sink::split_line;
///
/// let chunks = split_line("aaaa bbbb cccc dddd eeee ffff gggg", "alice", 40);
/// assert_eq!(chunks, vec!["aaaa bbbb cccc dddd eeee", "ffff gggg"]);
/// ```
pub fn split_line<'a>(line: &'a str, user: &str, maxlen: usize) -> Vec<&'a str> {
    let mut chunks = Vec::new();
    let mut rest = line;
    let mut budget = content_budget(maxlen, FIRST_OVERHEAD, user);

    while !rest.is_empty() {
        if rest.len() > budget {
            let cut = cut_point(rest, budget);
            chunks.push(&rest[..cut]);
            rest = rest[cut..].trim_start_matches(' ');
        } else {
            chunks.push(rest);
            rest = "";
        }
        budget = content_budget(maxlen, CONTINUED_OVERHEAD, user);
    }
    chunks
}

/// Runs `write` between `open` and `close`; `close` runs even on failure.
fn bracketed<F>(sink: &dyn SyslogSink, write: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    sink.open()?;
    let result = write();
    sink.close();
    result
}

/// Sends a summary line, split to fit `maxlen`.
///
/// Without a record the line is sent once, as is.
pub fn write_line(
    sink: &dyn SyslogSink,
    priority: Priority,
    line: &str,
    record: Option<&EventRecord>,
    maxlen: usize,
) -> Result<()> {
    bracketed(sink, || {
        let Some(record) = record else {
            return sink.send(priority, line);
        };
        let user = record.submit_user.as_str();
        for (i, chunk) in split_line(line, user, maxlen).into_iter().enumerate() {
            let message = if i == 0 {
                format!("{user:>8} : {chunk}")
            } else {
                format!("{user:>8} : (command continued) {chunk}")
            };
            sink.send(priority, &message)?;
        }
        Ok(())
    })
}

/// Sends a compact JSON fragment wrapped as `@cee:{"sudo":{...}}`.
pub fn write_json(sink: &dyn SyslogSink, priority: Priority, fragment: &str) -> Result<()> {
    bracketed(sink, || {
        sink.send(priority, &format!("@cee:{{\"sudo\":{{{fragment}}}}}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_line_is_one_message() {
        let sink = MemorySyslog::new();
        let record = EventRecord::new("alice");
        write_line(&sink, Priority::Notice, "HOST=a ; COMMAND=/bin/ls", Some(&record), 960)
            .unwrap();
        assert_eq!(sink.texts(), vec!["   alice : HOST=a ; COMMAND=/bin/ls"]);
        assert_eq!(sink.open_count(), 1);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn long_line_continues() {
        let sink = MemorySyslog::new();
        let record = EventRecord::new("alice");
        let line = "word ".repeat(20);
        write_line(&sink, Priority::Alert, line.trim_end(), Some(&record), 40).unwrap();

        let texts = sink.texts();
        assert!(texts.len() > 1);
        assert!(texts[0].starts_with("   alice : word"));
        for text in &texts[1..] {
            assert!(text.starts_with("   alice : (command continued) word"));
        }
        for text in &texts {
            assert!(text.len() <= 40, "{text:?} exceeds maxlen");
        }
        assert_eq!(sink.open_count(), 1);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn no_record_sends_line_as_is() {
        let sink = MemorySyslog::new();
        let line = "x".repeat(2000);
        write_line(&sink, Priority::Alert, &line, None, 100).unwrap();
        assert_eq!(sink.texts(), vec![line]);
    }

    #[test]
    fn hard_cut_without_spaces() {
        let chunks = split_line("abcdefghijklmnop", "bob", 20);
        // first budget 20 - (3 + 8) = 9, continuation budget 1
        assert_eq!(chunks[0], "abcdefghi");
        assert_eq!(chunks[1], "j");
        assert_eq!(chunks.concat(), "abcdefghijklmnop");
    }

    #[test]
    fn long_user_shrinks_budget() {
        let chunks = split_line("aaaa bbbb cccc dddd", "averyverylonguser", 35);
        // budget 35 - (3 + 17) = 15
        assert_eq!(chunks[0], "aaaa bbbb cccc");
    }

    #[test]
    fn multibyte_user_messages_fit_maxlen() {
        let sink = MemorySyslog::new();
        let record = EventRecord::new("jürgen");
        let line = ["word"; 40].join(" ");
        write_line(&sink, Priority::Notice, &line, Some(&record), 60).unwrap();

        let texts = sink.texts();
        assert!(texts.len() > 1);
        assert!(texts[0].starts_with("  jürgen : word"));
        assert!(texts.iter().all(|t| t.len() <= 60), "{texts:?}");
    }

    #[test]
    fn cut_respects_char_boundaries() {
        let line = "ééééé";
        let chunks = split_line(line, "bob", 14);
        // first budget 3: one two-byte char
        assert_eq!(chunks[0], "é");
        assert_eq!(chunks.concat(), line);
    }

    #[test]
    fn leading_spaces_dropped_after_cut() {
        let chunks = split_line("aaaa    bbbb", "bob", 16);
        // first budget 5
        assert_eq!(chunks, vec!["aaaa", "b", "b", "b", "b"]);
    }

    #[test]
    fn json_wrapped_with_cee_marker() {
        let sink = MemorySyslog::new();
        write_json(&sink, Priority::Notice, "\"accept\":{}").unwrap();
        assert_eq!(sink.texts(), vec!["@cee:{\"sudo\":{\"accept\":{}}}"]);
    }

    #[test]
    fn failing_sink_still_closes() {
        let sink = MemorySyslog::failing();
        let record = EventRecord::new("alice");
        assert!(write_line(&sink, Priority::Alert, "x", Some(&record), 960).is_err());
        assert_eq!(sink.close_count(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn into_vec_keeps_priorities() {
        let sink = MemorySyslog::new();
        sink.send(Priority::Alert, "a").unwrap();
        sink.send(Priority::Info, "b").unwrap();
        let messages = sink.into_vec();
        assert_eq!(messages[0].priority, Priority::Alert);
        assert_eq!(messages[1].text, "b");
    }
}
