//! The detached process tree that feeds the mailer.
//!
//! ```text
//! caller ── fork ──> first child ── fork ──> daemon ── fork ──> mailer
//!   waits for          exits at once          writes the       execs with
//!   first child                               message, waits   stdin = pipe
//! ```
//!
//! The mailer command and the message are prepared before the first fork.
//! The daemon still allocates to list its open descriptors and to report
//! failures to the system log. After a fork only the calling process
//! continues with Rust-level error propagation; children report failures
//! and `_exit`.
#![allow(unsafe_code)]

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult, Pid, Uid};
use syslog::{Facility, Formatter3164};

use super::{MailError, MailerCommand, Stage};
use crate::config::LogConfig;

/// First descriptor closed in the daemon.
const FIRST_CLOSED_FD: RawFd = 3;
/// Exit status of a mailer child that could not exec.
const EXEC_FAILED: i32 = 127;

/// Terminates the process immediately, without running exit handlers.
fn _exit(status: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { nix::libc::_exit(status) }
}

/// Where the detached processes report failures.
#[derive(Debug, Clone)]
pub struct DaemonLog {
    facility: Facility,
    ident: String,
}

impl DaemonLog {
    /// Uses the configured syslog facility and ident.
    pub fn new(config: &LogConfig) -> Self {
        Self {
            facility: config.syslog_facility.into(),
            ident: config.syslog_ident.clone(),
        }
    }

    /// Logs `error` at `err` priority; stderr is the null device by now.
    fn report(&self, error: MailError) {
        let formatter = Formatter3164 {
            facility: self.facility,
            hostname: None,
            process: self.ident.clone(),
            pid: std::process::id(),
        };
        if let Ok(mut logger) = syslog::unix(formatter) {
            let _ = logger.err(error);
        }
    }
}

/// Blocks `SIGCHLD` until dropped, so no handler reaps a child before
/// `waitpid` does.
struct SigchldGuard {
    mask: SigSet,
}

impl SigchldGuard {
    fn block() -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)?;
        Ok(Self { mask })
    }
}

impl Drop for SigchldGuard {
    fn drop(&mut self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&self.mask), None);
    }
}

/// Waits for `pid` to terminate, retrying on `EINTR` and stop reports.
fn reap(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) | Ok(WaitStatus::Stopped(..)) => continue,
            other => return other,
        }
    }
}

/// Hands `message` to a detached process tree running the mailer.
///
/// Returns once the first child has exited; by then the daemon owns the
/// delivery and has been reparented.
///
/// # Errors
///
/// Fails at [`Stage::SpawnDetached`] if `SIGCHLD` cannot be blocked or the
/// first fork fails.
pub fn deliver(
    command: &MailerCommand,
    message: &[u8],
    log: &DaemonLog,
    preserved_fds: &[RawFd],
) -> Result<(), MailError> {
    let guard =
        SigchldGuard::block().map_err(|e| MailError::new(Stage::SpawnDetached, e))?;

    // SAFETY: the child only forks again and calls `_exit`.
    match unsafe { unistd::fork() } {
        Err(errno) => Err(MailError::new(Stage::SpawnDetached, errno)),
        Ok(ForkResult::Parent { child }) => {
            let status = reap(child);
            tracing::debug!(?child, ?status, "mail relay handed off");
            drop(guard);
            Ok(())
        }
        Ok(ForkResult::Child) => first_child(command, message, log, preserved_fds),
    }
}

fn first_child(
    command: &MailerCommand,
    message: &[u8],
    log: &DaemonLog,
    preserved_fds: &[RawFd],
) -> ! {
    // SAFETY: the parent side only calls `_exit`.
    match unsafe { unistd::fork() } {
        Err(errno) => {
            log.report(MailError::new(Stage::Daemonize, errno));
            _exit(1)
        }
        Ok(ForkResult::Parent { .. }) => _exit(0),
        Ok(ForkResult::Child) => daemon(command, message, log, preserved_fds),
    }
}

/// Restores default `SIGCHLD` handling and unblocks it.
fn reset_sigchld() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: installs the default disposition, no handler code runs.
    unsafe { signal::sigaction(Signal::SIGCHLD, &default) }?;
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None)
}

fn start_session() -> nix::Result<()> {
    unistd::setsid().map(drop)
}

fn chdir_root() -> nix::Result<()> {
    unistd::chdir("/")
}

/// Points stdin, stdout and stderr at the null device.
fn redirect_stdio() -> nix::Result<()> {
    let null = fcntl::open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
    for target in 0..=2 {
        unistd::dup2(null, target)?;
    }
    if null > 2 {
        unistd::close(null)?;
    }
    Ok(())
}

/// Open descriptors at or above `FIRST_CLOSED_FD`.
fn open_fds() -> Vec<RawFd> {
    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        return entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|&fd| fd >= FIRST_CLOSED_FD)
            .collect();
    }
    let max = unistd::sysconf(unistd::SysconfVar::OPEN_MAX)
        .ok()
        .flatten()
        .and_then(|max| RawFd::try_from(max).ok())
        .unwrap_or(1024);
    (FIRST_CLOSED_FD..max).collect()
}

/// Closes every descriptor from 3 up that is not in `preserved`.
#[cfg(not(target_os = "macos"))]
fn close_fds(preserved: &[RawFd]) {
    for fd in open_fds() {
        if !preserved.contains(&fd) {
            let _ = unistd::close(fd);
        }
    }
}

/// Marks descriptors close-on-exec instead of closing them; libdispatch
/// owns some of them.
#[cfg(target_os = "macos")]
fn close_fds(preserved: &[RawFd]) {
    for fd in open_fds() {
        if !preserved.contains(&fd) {
            let _ = fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFD(fcntl::FdFlag::FD_CLOEXEC));
        }
    }
}

fn daemon(
    command: &MailerCommand,
    message: &[u8],
    log: &DaemonLog,
    preserved_fds: &[RawFd],
) -> ! {
    let steps: [fn() -> nix::Result<()>; 4] =
        [reset_sigchld, start_session, chdir_root, redirect_stdio];
    for step in steps {
        if let Err(errno) = step() {
            log.report(MailError::new(Stage::Daemonize, errno));
        }
    }
    close_fds(preserved_fds);

    let (read_end, write_end) = match unistd::pipe() {
        Ok(pair) => pair,
        Err(errno) => {
            log.report(MailError::new(Stage::Daemonize, errno));
            _exit(1)
        }
    };

    // SAFETY: the child only rewires descriptors, changes uid and execs.
    let mailer = match unsafe { unistd::fork() } {
        Err(errno) => {
            log.report(MailError::new(Stage::Daemonize, errno));
            _exit(1)
        }
        Ok(ForkResult::Child) => exec_mailer(command, read_end, write_end, log),
        Ok(ForkResult::Parent { child }) => child,
    };

    drop(read_end);
    let mut pipe = File::from(write_end);
    if let Err(e) = pipe.write_all(message) {
        let errno = e.raw_os_error().map_or(Errno::EIO, Errno::from_raw);
        log.report(MailError::new(Stage::Daemonize, errno));
    }
    drop(pipe);

    let _ = reap(mailer);
    _exit(0)
}

/// Switches to root first, then to the mail user unless that is root.
fn drop_privileges(mail_uid: u32) -> nix::Result<()> {
    // Failing here just means we were not running as root.
    let _ = unistd::setuid(Uid::from_raw(0));
    if mail_uid != 0 {
        unistd::setuid(Uid::from_raw(mail_uid))?;
    }
    Ok(())
}

fn exec_mailer(
    command: &MailerCommand,
    read_end: OwnedFd,
    write_end: OwnedFd,
    log: &DaemonLog,
) -> ! {
    drop(write_end);
    if let Err(errno) = unistd::dup2(read_end.as_raw_fd(), 0) {
        log.report(MailError::new(Stage::Exec, errno));
        _exit(EXEC_FAILED)
    }
    drop(read_end);

    if let Err(errno) = drop_privileges(command.mail_uid) {
        log.report(MailError::new(Stage::DropPrivileges, errno));
        _exit(EXEC_FAILED)
    }

    let errno = if command.runs_as_root() {
        match unistd::execve(&command.path, command.argv.as_slice(), command.root_env.as_slice()) {
            Err(errno) => errno,
            Ok(never) => match never {},
        }
    } else {
        match unistd::execv(&command.path, command.argv.as_slice()) {
            Err(errno) => errno,
            Ok(never) => match never {},
        }
    };
    log.report(MailError::new(Stage::Exec, errno));
    _exit(EXEC_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_blocks_and_restores_sigchld() {
        let is_blocked = || {
            let mut current = SigSet::empty();
            signal::sigprocmask(SigmaskHow::SIG_BLOCK, None, Some(&mut current)).unwrap();
            current.contains(Signal::SIGCHLD)
        };
        assert!(!is_blocked());
        {
            let _guard = SigchldGuard::block().unwrap();
            assert!(is_blocked());
        }
        assert!(!is_blocked());
    }

    #[test]
    fn privilege_drop_to_another_user_fails_unprivileged() {
        // As root this would really switch users.
        if unistd::geteuid().is_root() {
            return;
        }
        let other = unistd::getuid().as_raw() + 1;
        assert_eq!(drop_privileges(other), Err(Errno::EPERM));
    }

    #[test]
    fn open_fds_skips_stdio() {
        let fds = open_fds();
        assert!(fds.iter().all(|&fd| fd >= FIRST_CLOSED_FD));
    }
}
