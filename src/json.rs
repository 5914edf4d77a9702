//! JSON rendering of events.
//!
//! An event renders as a *fragment*, the member `"accept": { ... }` without
//! the enclosing braces. The file sink splices fragments into one top-level
//! object; the syslog sink wraps a compact fragment as
//! `@cee:{"sudo":{...}}`.

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::config::LogConfig;
use crate::error::{EventLogError, Result};
use crate::event::{EventArgs, EventKind};
use crate::record::{EventRecord, Timespec};
use crate::timefmt::{self, ISO8601_COMPACT};

/// Supplies the record fields of a JSON event.
///
/// Callers that log something other than an [`EventRecord`] pass their own
/// provider through [`EventArgs::info`]; closures taking the object map
/// implement this trait directly.
///
/// # Examples
///
/// ```
/// use eventlog::json::JsonInfo;
/// use serde_json::{json, Map, Value};
///
/// let info = |obj: &mut Map<String, Value>| -> eventlog::Result<()> {
///     obj.insert("client".to_string(), json!("10.0.0.8"));
///     Ok(())
/// };
///
/// let mut obj = Map::new();
/// info.write_json(&mut obj).unwrap();
/// assert_eq!(obj["client"], "10.0.0.8");
/// ```
pub trait JsonInfo {
    /// Adds fields to `obj`.
    fn write_json(&self, obj: &mut Map<String, Value>) -> Result<()>;
}

impl<F> JsonInfo for F
where
    F: Fn(&mut Map<String, Value>) -> Result<()>,
{
    fn write_json(&self, obj: &mut Map<String, Value>) -> Result<()> {
        self(obj)
    }
}

fn insert_str(obj: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        obj.insert(key.to_string(), Value::from(value.as_str()));
    }
}

/// The default dump of a record.
impl JsonInfo for EventRecord {
    fn write_json(&self, obj: &mut Map<String, Value>) -> Result<()> {
        if self.submit_user.is_empty() {
            return Err(EventLogError::MissingField("submituser"));
        }
        obj.insert("submituser".to_string(), Value::from(self.submit_user.as_str()));
        insert_str(obj, "command", &self.command);
        insert_str(obj, "runuser", &self.run_user);
        insert_str(obj, "rungroup", &self.run_group);
        insert_str(obj, "runchroot", &self.run_chroot);
        insert_str(obj, "runcwd", &self.run_cwd);
        insert_str(obj, "ttyname", &self.tty_name);
        insert_str(obj, "submithost", &self.submit_host);
        insert_str(obj, "submitcwd", &self.submit_cwd);
        if let (Some(_), Some(gid)) = (&self.run_group, self.run_gid) {
            obj.insert("rungid".to_string(), Value::from(gid));
        }
        if let Some(uid) = self.run_uid {
            obj.insert("runuid".to_string(), Value::from(uid));
        }
        obj.insert("columns".to_string(), Value::from(self.columns));
        obj.insert("lines".to_string(), Value::from(self.lines));
        if !self.argv.is_empty() {
            obj.insert("runargv".to_string(), Value::from(self.argv.clone()));
        }
        if !self.envp.is_empty() {
            obj.insert("runenv".to_string(), Value::from(self.envp.clone()));
        }
        Ok(())
    }
}

/// Builds a timestamp object.
///
/// With `time_fmt` set, the object also carries `iso8601` (UTC) and
/// `localtime` strings; either is left out if it cannot be rendered.
pub fn timestamp(ts: Timespec, time_fmt: Option<&str>) -> Value {
    let mut obj = Map::new();
    obj.insert("seconds".to_string(), Value::from(ts.seconds));
    obj.insert("nanoseconds".to_string(), Value::from(ts.nanoseconds));
    if let Some(fmt) = time_fmt {
        if let Some(iso) = timefmt::format_utc(ts, ISO8601_COMPACT) {
            obj.insert("iso8601".to_string(), Value::from(iso));
        }
        if let Some(local) = timefmt::format_local(ts, fmt) {
            obj.insert("localtime".to_string(), Value::from(local));
        }
    }
    Value::Object(obj)
}

/// Layout of rendered JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStyle {
    /// Four-space indented, as written to log files
    Pretty,
    /// Single line, as sent to syslog
    Compact,
}

/// Renders events as JSON fragments.
#[derive(Debug, Clone, Copy)]
pub struct JsonFormatter<'c> {
    config: &'c LogConfig,
}

impl<'c> JsonFormatter<'c> {
    /// Creates a formatter reading `config`.
    pub fn new(config: &'c LogConfig) -> Self {
        Self { config }
    }

    /// Builds the event object for `kind`, reading the clock for
    /// `server_time`.
    ///
    /// # Errors
    ///
    /// Fails if the clock cannot be read or the info provider fails.
    pub fn event_object(
        &self,
        kind: EventKind,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
    ) -> Result<Map<String, Value>> {
        let now = Timespec::now()?;
        self.event_object_at(kind, args, record, now)
    }

    fn event_object_at(
        &self,
        kind: EventKind,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
        now: Timespec,
    ) -> Result<Map<String, Value>> {
        let time_fmt = Some(self.config.time_fmt.as_str());
        let mut obj = Map::new();

        let uuid = record
            .and_then(|r| r.uuid.as_deref())
            .filter(|u| !u.is_empty());
        if let Some(uuid) = uuid {
            obj.insert("uuid".to_string(), Value::from(uuid));
        }

        if let Some(reason) = args.reason {
            let reason = match args.errstr {
                Some(errstr) => format!("{reason}: {errstr}"),
                None => reason.to_string(),
            };
            obj.insert("reason".to_string(), Value::from(reason));
        }

        obj.insert("server_time".to_string(), timestamp(now, time_fmt));
        if let Some(event_time) = args.event_time {
            obj.insert(kind.time_key().to_string(), timestamp(event_time, time_fmt));
        }

        if let (EventKind::Exit, Some(record)) = (kind, record) {
            if record.run_time.is_set() {
                obj.insert("run_time".to_string(), timestamp(record.run_time, None));
            }
            if let Some(signal) = &record.signal_name {
                obj.insert("signal".to_string(), Value::from(signal.as_str()));
                obj.insert("dumped_core".to_string(), Value::from(record.dumped_core));
            }
            obj.insert(
                "exit_value".to_string(),
                Value::from(record.exit_value.unwrap_or(-1)),
            );
        }

        if let Some(record) = record {
            insert_str(&mut obj, "peeraddr", &record.peer_addr);
            if let Some(path) = &record.iolog_path {
                obj.insert("iolog_path".to_string(), Value::from(path.as_str()));
                if record.iolog_offset.is_set() {
                    obj.insert(
                        "iolog_offset".to_string(),
                        timestamp(record.iolog_offset, None),
                    );
                }
            }
        }

        // Exit events that carry a uuid refer back to the accept record.
        let info: Option<&dyn JsonInfo> = match (args.info, record) {
            (Some(info), _) => Some(info),
            (None, Some(_)) if kind == EventKind::Exit && uuid.is_some() => None,
            (None, Some(record)) => Some(record),
            (None, None) => None,
        };
        if let Some(info) = info {
            info.write_json(&mut obj)?;
        }

        Ok(obj)
    }

    /// Renders the `"kind": { ... }` fragment for one event.
    ///
    /// # Errors
    ///
    /// Fails if the clock cannot be read, the info provider fails or the
    /// value cannot be serialized.
    pub fn format(
        &self,
        kind: EventKind,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
        style: JsonStyle,
    ) -> Result<String> {
        let obj = self.event_object(kind, args, record)?;
        fragment(kind, obj, style)
    }
}

/// Serializes `{kind: obj}` and strips the outer braces.
fn fragment(kind: EventKind, obj: Map<String, Value>, style: JsonStyle) -> Result<String> {
    let mut wrapper = Map::new();
    wrapper.insert(kind.as_str().to_string(), Value::Object(obj));

    let text = match style {
        JsonStyle::Compact => serde_json::to_string(&wrapper)?,
        JsonStyle::Pretty => {
            let mut buf = Vec::new();
            let mut ser = serde_json::Serializer::with_formatter(
                &mut buf,
                PrettyFormatter::with_indent(b"    "),
            );
            wrapper.serialize(&mut ser)?;
            String::from_utf8_lossy(&buf).into_owned()
        }
    };

    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text.as_str());
    let inner = inner.strip_suffix('\n').unwrap_or(inner);
    Ok(inner.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn record() -> EventRecord {
        EventRecord {
            submit_host: Some("myhost".to_string()),
            tty_name: Some("/dev/pts/3".to_string()),
            run_user: Some("root".to_string()),
            run_uid: Some(0),
            command: Some("/bin/ls".to_string()),
            argv: vec!["ls".to_string(), "-la".to_string()],
            lines: 24,
            columns: 80,
            ..EventRecord::new("alice")
        }
    }

    fn object(
        kind: EventKind,
        args: &EventArgs<'_>,
        record: Option<&EventRecord>,
    ) -> Map<String, Value> {
        let config = LogConfig::default();
        JsonFormatter::new(&config)
            .event_object_at(kind, args, record, Timespec::new(1_700_000_000, 5))
            .expect("object builds")
    }

    #[test]
    fn accept_field_order() {
        let args = EventArgs::default().with_event_time(Timespec::new(1_699_999_999, 0));
        let obj = object(EventKind::Accept, &args, Some(&record()));
        let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "server_time",
                "submit_time",
                "submituser",
                "command",
                "runuser",
                "ttyname",
                "submithost",
                "runuid",
                "columns",
                "lines",
                "runargv",
            ]
        );
    }

    #[test]
    fn reason_joins_errstr() {
        let args = EventArgs::default()
            .with_reason("unable to open")
            .with_errstr("EACCES");
        let obj = object(EventKind::Alert, &args, None);
        assert_eq!(obj["reason"], "unable to open: EACCES");
        assert!(!obj.contains_key("submituser"));
    }

    #[test]
    fn server_time_has_formatted_strings() {
        let obj = object(EventKind::Accept, &EventArgs::default(), Some(&record()));
        let server_time = &obj["server_time"];
        assert_eq!(server_time["seconds"], 1_700_000_000);
        assert_eq!(server_time["nanoseconds"], 5);
        assert_eq!(server_time["iso8601"], "20231114221320Z");
        assert!(server_time["localtime"].is_string());
    }

    #[test]
    fn exit_with_signal_and_no_status() {
        let record = EventRecord {
            signal_name: Some("SEGV".to_string()),
            dumped_core: true,
            run_time: Timespec::new(3, 0),
            ..record()
        };
        let obj = object(EventKind::Exit, &EventArgs::default(), Some(&record));
        assert_eq!(obj["signal"], "SEGV");
        assert_eq!(obj["dumped_core"], true);
        assert_eq!(obj["exit_value"], -1);
        assert_eq!(obj["run_time"]["seconds"], 3);
        assert!(obj["run_time"].get("iso8601").is_none());
    }

    #[test]
    fn exit_with_uuid_skips_record_dump() {
        let record = EventRecord {
            uuid: Some("a1b2".to_string()),
            exit_value: Some(0),
            ..record()
        };
        let obj = object(EventKind::Exit, &EventArgs::default(), Some(&record));
        assert_eq!(obj["uuid"], "a1b2");
        assert_eq!(obj["exit_value"], 0);
        assert!(!obj.contains_key("submituser"));
    }

    #[test]
    fn iolog_offset_follows_path() {
        let record = EventRecord {
            iolog_path: Some("/var/log/sudo-io/00/00/01".to_string()),
            iolog_offset: Timespec::new(7, 0),
            peer_addr: Some("10.0.0.8".to_string()),
            ..record()
        };
        let obj = object(EventKind::Accept, &EventArgs::default(), Some(&record));
        let keys: Vec<&str> = obj.keys().map(String::as_str).take(4).collect();
        assert_eq!(keys, ["server_time", "peeraddr", "iolog_path", "iolog_offset"]);
    }

    #[test]
    fn custom_info_replaces_dump() {
        let info = |obj: &mut Map<String, Value>| -> Result<()> {
            obj.insert("policy".to_string(), Value::from("custom"));
            Ok(())
        };
        let args = EventArgs::default().with_info(&info);
        let obj = object(EventKind::Reject, &args, Some(&record()));
        assert_eq!(obj["policy"], "custom");
        assert!(!obj.contains_key("submituser"));
    }

    #[test]
    fn default_dump_requires_submit_user() {
        let config = LogConfig::default();
        let error = JsonFormatter::new(&config)
            .event_object(EventKind::Accept, &EventArgs::default(), Some(&EventRecord::default()))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn rungid_needs_rungroup() {
        let mut with_gid = record();
        with_gid.run_gid = Some(10);
        let mut obj = Map::new();
        with_gid.write_json(&mut obj).unwrap();
        assert!(!obj.contains_key("rungid"));

        with_gid.run_group = Some("wheel".to_string());
        let mut obj = Map::new();
        with_gid.write_json(&mut obj).unwrap();
        assert_eq!(obj["rungid"], 10);
    }

    #[test]
    fn pretty_fragment_layout() {
        let mut obj = Map::new();
        obj.insert("submituser".to_string(), Value::from("alice"));
        let text = fragment(EventKind::Accept, obj, JsonStyle::Pretty).unwrap();
        assert_eq!(
            text,
            "\n    \"accept\": {\n        \"submituser\": \"alice\"\n    }"
        );
    }

    #[test]
    fn compact_fragment_layout() {
        let mut obj = Map::new();
        obj.insert("submituser".to_string(), Value::from("alice"));
        let text = fragment(EventKind::Reject, obj, JsonStyle::Compact).unwrap();
        assert_eq!(text, "\"reject\":{\"submituser\":\"alice\"}");
    }
}
