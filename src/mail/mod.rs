//! Administrator notification by mail.
//!
//! The message is composed in the calling process and handed to a detached
//! process tree (see [`spawn`]) that pipes it into the configured mailer.
//! The caller only waits for the first fork to finish.

use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;

use crate::config::{LogConfig, MailConfig};
use crate::error::Result;
use crate::record::{EventRecord, Timespec};
use crate::timefmt;

pub mod spawn;

/// Maximum number of flags passed to the mailer.
const MAX_MAILER_FLAGS: usize = 62;
/// Time format used when the configured one cannot be rendered.
const FALLBACK_TIME_FMT: &str = "%h %e %T";

const ROOT_ENV: [&str; 4] = [
    "HOME=/",
    "PATH=/usr/bin:/bin:/usr/sbin:/sbin",
    "LOGNAME=root",
    "USER=root",
];

/// Step of the relay's process tree at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Blocking `SIGCHLD` or forking away from the caller
    SpawnDetached,
    /// Detaching the daemon and setting up its pipe and mailer child
    Daemonize,
    /// Switching the mailer child to the mail user
    DropPrivileges,
    /// Wiring stdin and executing the mailer
    Exec,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnDetached => write!(f, "spawn detached process"),
            Self::Daemonize => write!(f, "daemonize"),
            Self::DropPrivileges => write!(f, "drop privileges"),
            Self::Exec => write!(f, "execute mailer"),
        }
    }
}

/// A mail relay failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("mail relay: unable to {stage}: {source}")]
pub struct MailError {
    /// Where the relay failed
    pub stage: Stage,
    /// The underlying errno
    #[source]
    pub source: Errno,
}

impl MailError {
    pub(crate) fn new(stage: Stage, source: Errno) -> Self {
        Self { stage, source }
    }
}

/// Expands `%h` (submitting host) and `%u` (submitting user) in a subject
/// template.
///
/// A `%` directly followed by another `%` is copied as is, so `%%` is never
/// collapsed. Unknown escapes and a trailing `%` pass through unchanged.
/// Without a record both escapes expand to nothing.
///
/// # Examples
///
/// ```
/// use eventlog::EventRecord;
/// use eventlog::mail::expand_subject;
///
/// let record = EventRecord {
///     submit_host: Some("box1".to_string()),
///     ..EventRecord::new("alice")
/// };
/// assert_eq!(
///     expand_subject("sudo alert for %h by %u", Some(&record)),
///     "sudo alert for box1 by alice"
/// );
/// assert_eq!(expand_subject("100%% %x", Some(&record)), "100%% %x");
/// ```
pub fn expand_subject(template: &str, record: Option<&EventRecord>) -> String {
    let host = record.and_then(|r| r.submit_host.as_deref()).unwrap_or("");
    let user = record.map_or("", |r| r.submit_user.as_str());

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('h') => {
                chars.next();
                out.push_str(host);
            }
            Some('u') => {
                chars.next();
                out.push_str(user);
            }
            _ => out.push('%'),
        }
    }
    out
}

/// Returns the charset for a locale name, or `None` for the `C`/`POSIX`
/// locale.
///
/// The charset is the codeset part of `language_TERRITORY.codeset@modifier`;
/// locales without one are assumed to be UTF-8.
pub fn charset_for_locale(locale: &str) -> Option<String> {
    if locale.is_empty() || locale == "C" || locale == "POSIX" {
        return None;
    }
    let codeset = locale
        .split_once('.')
        .map(|(_, rest)| rest.split('@').next().unwrap_or(rest))
        .filter(|codeset| !codeset.is_empty())
        .unwrap_or("UTF-8");
    Some(codeset.to_string())
}

/// Reads the active locale from `LC_ALL`, `LC_CTYPE` or `LANG` and returns
/// its charset.
pub fn locale_charset() -> Option<String> {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .and_then(|locale| charset_for_locale(&locale))
}

/// Composes the full message piped to the mailer.
///
/// `now` is rendered with the configured time format, falling back to
/// `%h %e %T` and then to an empty string.
pub fn compose_message(
    config: &LogConfig,
    record: Option<&EventRecord>,
    body: &str,
    now: Timespec,
    charset: Option<&str>,
) -> String {
    let mail = &config.mail;
    let mailto = mail.mailto.as_deref().unwrap_or("root");
    let from = mail
        .mailfrom
        .as_deref()
        .or(record.map(|r| r.submit_user.as_str()))
        .unwrap_or("root");

    let mut message = format!(
        "To: {mailto}\nFrom: {from}\nAuto-Submitted: auto-generated\nSubject: {}",
        expand_subject(&mail.subject, record)
    );
    if let Some(charset) = charset {
        message.push_str(&format!(
            "\nContent-Type: text/plain; charset=\"{charset}\"\nContent-Transfer-Encoding: 8bit"
        ));
    }

    let time = timefmt::format_local(now, &config.time_fmt)
        .or_else(|| timefmt::format_local(now, FALLBACK_TIME_FMT))
        .unwrap_or_default();
    match record {
        Some(record) => {
            let host = record.submit_host.as_deref().unwrap_or("");
            message.push_str(&format!(
                "\n\n{host} : {time} : {} : {body}\n\n",
                record.submit_user
            ));
        }
        None => message.push_str(&format!("\n\n{time} : {body}\n\n")),
    }
    message
}

/// The mailer invocation, prepared before forking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailerCommand {
    path: CString,
    argv: Vec<CString>,
    mail_uid: u32,
    root_env: Vec<CString>,
}

impl MailerCommand {
    /// Builds the argument vector for `mailer_path`: its basename followed
    /// by the configured flags, split on spaces and tabs.
    ///
    /// # Errors
    ///
    /// Fails with `EINVAL` at [`Stage::Exec`] if the path or a flag
    /// contains a NUL byte.
    pub fn new(mailer_path: &Path, mail: &MailConfig) -> std::result::Result<Self, MailError> {
        let invalid = |_| MailError::new(Stage::Exec, Errno::EINVAL);

        let path = CString::new(mailer_path.as_os_str().as_bytes()).map_err(invalid)?;
        let name = mailer_path
            .file_name()
            .map_or(mailer_path.as_os_str().as_bytes(), |n| n.as_bytes());

        let mut argv = vec![CString::new(name).map_err(invalid)?];
        for flag in mail
            .mailer_flags
            .split([' ', '\t'])
            .filter(|f| !f.is_empty())
            .take(MAX_MAILER_FLAGS)
        {
            argv.push(CString::new(flag).map_err(invalid)?);
        }

        let root_env = ROOT_ENV
            .iter()
            .map(|var| CString::new(*var).map_err(invalid))
            .collect::<std::result::Result<_, _>>()?;

        Ok(Self {
            path,
            argv,
            mail_uid: mail.mail_uid,
            root_env,
        })
    }

    /// Path of the mailer binary.
    pub fn path(&self) -> &CString {
        &self.path
    }

    /// Arguments, starting with the mailer's basename.
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// Returns `true` if the mailer runs as root with a fixed environment.
    pub fn runs_as_root(&self) -> bool {
        self.mail_uid == 0
    }
}

/// Sends notification mail through the configured mailer.
#[derive(Debug, Clone, Copy)]
pub struct MailRelay<'c> {
    config: &'c LogConfig,
}

impl<'c> MailRelay<'c> {
    /// Creates a relay reading `config`.
    pub fn new(config: &'c LogConfig) -> Self {
        Self { config }
    }

    /// Mails `body` to the configured recipient.
    ///
    /// Returns `Ok` without doing anything if mail is not configured or the
    /// mailer is not a regular file. Otherwise returns once the detached
    /// relay process has been handed the message; delivery itself is not
    /// awaited.
    ///
    /// # Errors
    ///
    /// Fails if the clock cannot be read, the mailer command is invalid, or
    /// the first fork fails.
    pub fn send(&self, record: Option<&EventRecord>, body: &str) -> Result<()> {
        let mail = &self.config.mail;
        let Some(mailer_path) = mail.mailer_path.as_ref().filter(|_| mail.is_enabled()) else {
            return Ok(());
        };

        match std::fs::metadata(mailer_path) {
            Ok(meta) if meta.is_file() => {}
            _ => {
                tracing::debug!(
                    mailer = %mailer_path.display(),
                    "mailer missing or not a regular file, not sending mail"
                );
                return Ok(());
            }
        }

        let now = Timespec::now()?;
        let charset = locale_charset();
        let message = compose_message(self.config, record, body, now, charset.as_deref());
        let command = MailerCommand::new(mailer_path, mail)?;

        spawn::deliver(
            &command,
            message.as_bytes(),
            &spawn::DaemonLog::new(self.config),
            &self.config.preserved_fds,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record() -> EventRecord {
        EventRecord {
            submit_host: Some("box1".to_string()),
            ..EventRecord::new("alice")
        }
    }

    #[test]
    fn subject_escapes() {
        let r = record();
        assert_eq!(
            expand_subject("sudo alert for %h by %u", Some(&r)),
            "sudo alert for box1 by alice"
        );
        assert_eq!(expand_subject("%h", None), "");
    }

    #[test]
    fn subject_percent_handling() {
        let r = record();
        assert_eq!(expand_subject("%%", Some(&r)), "%%");
        assert_eq!(expand_subject("%%h", Some(&r)), "%box1");
        assert_eq!(expand_subject("50%x", Some(&r)), "50%x");
        assert_eq!(expand_subject("done%", Some(&r)), "done%");
    }

    #[test]
    fn charset_from_locale_names() {
        assert_eq!(charset_for_locale("C"), None);
        assert_eq!(charset_for_locale("POSIX"), None);
        assert_eq!(charset_for_locale("en_US.UTF-8").as_deref(), Some("UTF-8"));
        assert_eq!(
            charset_for_locale("de_DE.ISO-8859-15@euro").as_deref(),
            Some("ISO-8859-15")
        );
        assert_eq!(charset_for_locale("en_US").as_deref(), Some("UTF-8"));
    }

    #[test]
    fn message_with_record() {
        let config = LogConfig::default().with_time_fmt("%Y");
        let message = compose_message(
            &config,
            Some(&record()),
            "command not allowed",
            Timespec::new(1_700_000_000, 0),
            None,
        );
        assert!(message.starts_with(
            "To: root\nFrom: alice\nAuto-Submitted: auto-generated\n\
             Subject: *** SECURITY information for box1 ***\n\nbox1 : 2023 : alice : "
        ));
        assert!(message.ends_with("command not allowed\n\n"));
        assert!(!message.contains("Content-Type"));
    }

    #[test]
    fn message_without_record_uses_root_and_charset() {
        let mut config = LogConfig::default().with_time_fmt("%Q");
        config.mail.mailto = Some("admin@example.com".to_string());
        let message = compose_message(
            &config,
            None,
            "alert",
            Timespec::new(1_700_000_000, 0),
            Some("UTF-8"),
        );
        assert!(message.starts_with("To: admin@example.com\nFrom: root\n"));
        assert!(message.contains(
            "\nContent-Type: text/plain; charset=\"UTF-8\"\nContent-Transfer-Encoding: 8bit\n\n"
        ));
        // bad format falls back to "%h %e %T"
        let body = message.rsplit("\n\n").nth(1).unwrap();
        assert!(body.ends_with(" : alert"));
        assert_eq!(body.matches(':').count(), 3);
    }

    #[test]
    fn mailfrom_overrides_user() {
        let mut config = LogConfig::default();
        config.mail.mailfrom = Some("sudo@example.com".to_string());
        let message = compose_message(&config, Some(&record()), "x", Timespec::new(0, 0), None);
        assert!(message.contains("\nFrom: sudo@example.com\n"));
    }

    #[test]
    fn mailer_argv() {
        let mail = MailConfig {
            mailer_flags: " -t\t-oi  -f root ".to_string(),
            mail_uid: 8,
            ..MailConfig::default()
        };
        let command = MailerCommand::new(Path::new("/usr/sbin/sendmail"), &mail).unwrap();
        let argv: Vec<&str> = command.argv().iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(argv, ["sendmail", "-t", "-oi", "-f", "root"]);
        assert_eq!(command.path().to_str().unwrap(), "/usr/sbin/sendmail");
        assert!(!command.runs_as_root());
    }

    #[test]
    fn mailer_flags_are_capped() {
        let mail = MailConfig {
            mailer_flags: "-x ".repeat(100),
            ..MailConfig::default()
        };
        let command = MailerCommand::new(Path::new("/bin/mail"), &mail).unwrap();
        assert_eq!(command.argv().len(), 1 + MAX_MAILER_FLAGS);
        assert!(command.runs_as_root());
    }

    #[test]
    fn mailer_nul_byte_rejected() {
        let mail = MailConfig {
            mailer_flags: "-t\0".to_string(),
            ..MailConfig::default()
        };
        let error = MailerCommand::new(Path::new("/bin/mail"), &mail).unwrap_err();
        assert_eq!(error.stage, Stage::Exec);
        assert_eq!(error.source, Errno::EINVAL);
    }

    #[test]
    fn unconfigured_or_missing_mailer_is_noop() {
        let mut config = LogConfig::default();
        config.mail.mailto = None;
        assert!(MailRelay::new(&config).send(None, "x").is_ok());

        let config = LogConfig::default().with_mail(MailConfig {
            mailer_path: Some(PathBuf::from("/nonexistent/sendmail")),
            ..MailConfig::default()
        });
        assert!(MailRelay::new(&config).send(Some(&record()), "x").is_ok());

        let config = LogConfig::default().with_mail(MailConfig {
            mailer_path: Some(PathBuf::from("/")),
            ..MailConfig::default()
        });
        assert!(MailRelay::new(&config).send(Some(&record()), "x").is_ok());
    }

    #[test]
    fn mail_error_display_names_stage() {
        let error = MailError::new(Stage::SpawnDetached, Errno::EAGAIN);
        assert!(error.to_string().starts_with("mail relay: unable to spawn detached process"));
    }
}
