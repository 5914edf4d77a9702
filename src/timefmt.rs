//! strftime-style rendering of [`Timespec`] values.
//!
//! Formats come from configuration, so a bad format must not panic: every
//! helper returns `None` when the format cannot be rendered.

use std::fmt::Write;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::record::Timespec;

/// UTC layout used for the `iso8601` JSON field.
pub(crate) const ISO8601_COMPACT: &str = "%Y%m%d%H%M%SZ";

fn render<Tz>(time: DateTime<Tz>, fmt: &str) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    write!(out, "{}", time.format(fmt)).ok()?;
    (!out.is_empty()).then_some(out)
}

/// Renders `ts` in UTC.
pub(crate) fn format_utc(ts: Timespec, fmt: &str) -> Option<String> {
    let time = DateTime::<Utc>::from_timestamp(ts.seconds, ts.nanoseconds)?;
    render(time, fmt)
}

/// Renders `ts` in the local time zone.
pub(crate) fn format_local(ts: Timespec, fmt: &str) -> Option<String> {
    let time = DateTime::<Utc>::from_timestamp(ts.seconds, ts.nanoseconds)?;
    render(time.with_timezone(&Local), fmt)
}
