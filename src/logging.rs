use std::fmt;

use crate::event::EventKind;
use crate::record::EventRecord;

/// Diagnostic logger for one dispatch call.
///
/// `EventTrace` borrows from the call's record, so it cannot outlive the
/// call. Every message is tagged with the event kind and the submitting user.
/// Diagnostics go through `tracing`; they are never part of the audit output
/// itself.
#[derive(Debug, Clone, Copy)]
pub struct EventTrace<'a> {
    kind: EventKind,
    user: &'a str,
}

impl<'a> EventTrace<'a> {
    /// Creates a trace for `kind`, tagged with the record's submitting user.
    pub(crate) fn new(kind: EventKind, record: Option<&'a EventRecord>) -> Self {
        Self {
            kind,
            user: record.map_or("", |r| r.submit_user.as_str()),
        }
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(event = %self.kind, user = %self.user, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(event = %self.kind, user = %self.user, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(event = %self.kind, user = %self.user, "{}", args);
    }
}
