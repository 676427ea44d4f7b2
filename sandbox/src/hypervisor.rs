//! The supervisor loop: poll + wait + enforce.
//!
//! Single-threaded by design (see spec's concurrency model): the only
//! suspension point is `wait4`, interrupted every polling quantum by the
//! interval timer so `/proc` can be re-sampled. This intentionally departs
//! from the teacher's background-thread `daemon` model — see
//! `DESIGN.md` for the rationale — and instead follows
//! `original_source/src/hypervisor.cpp`.

use nix::sys::signal::Signal;
use nix::unistd::Pid as NixPid;

use crate::timer::{self, SupervisorSession};
use crate::{proc_reader, ErrorKind, Limits, ProcessDescriptor, Result, Stats, VerdictCode};

/// The maximum delay between a limit breach and the kill, and the floor of
/// time/memory reporting precision.
const POLLING_QUANTUM_US: i64 = 25_000;

/// RAII guard ensuring the child is killed if this guard is dropped before
/// the child has been definitively reaped (e.g. on an early return from an
/// unexpected `wait4` error).
struct ChildGuard {
    pid: i32,
    armed: bool,
}

impl ChildGuard {
    fn new(pid: i32) -> ChildGuard {
        ChildGuard { pid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = nix::sys::signal::kill(NixPid::from_raw(self.pid), Signal::SIGKILL);
        }
    }
}

/// Supervise `desc`'s already-spawned child until it is reaped, updating
/// `desc.stats()` throughout. Returns once the child has terminated.
pub fn supervise(desc: &mut ProcessDescriptor) -> Result<()> {
    let pid = desc
        .pid()
        .expect("supervise() called before ProcessDescriptor::spawn()");

    let session = SupervisorSession::start().map_err(|e| {
        crate::Error::from(ErrorKind::SupervisorFailed(format!(
            "failed to install SIGALRM handler: {}",
            e
        )))
    })?;

    let mut guard = ChildGuard::new(pid);
    let result = supervise_loop(pid, desc.limits, desc.stats_mut());
    guard.disarm();
    drop(session);

    result
}

fn supervise_loop(pid: i32, limits: Limits, stats: &mut Stats) -> Result<()> {
    loop {
        timer::arm(POLLING_QUANTUM_US);

        let mut status: libc::c_int = 0;
        let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::wait4(pid, &mut status, 0, &mut rusage) };

        if ret == pid {
            timer::disarm();

            stats.check_wall(&limits);

            let cpu_ms = rusage_cpu_ms(&rusage);
            stats.check_cpu(&limits, cpu_ms);

            let peak_kb = rusage.ru_maxrss as u64;
            stats.check_mem(&limits, peak_kb);

            stats.check_exit_status(status);

            log::debug!(
                "child {} reaped: cpu_ms={} wall_ms={} peak_kb={} result={}",
                pid,
                stats.cpu_ms,
                stats.wall_ms,
                stats.peak_mem_kb,
                stats.result
            );
            return Ok(());
        }

        if ret == -1 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EINTR) {
                // Timer fired; re-sample /proc and keep polling.
                stats.check_wall(&limits);
                stats.check_cpu(&limits, proc_reader::cpu_ms(pid));
                stats.check_mem(&limits, proc_reader::peak_rss_kb(pid));

                log::trace!(
                    "poll: cpu_ms={} wall_ms={} peak_kb={} result={}",
                    stats.cpu_ms,
                    stats.wall_ms,
                    stats.peak_mem_kb,
                    stats.result
                );

                if stats.result != VerdictCode::Ok {
                    let _ = nix::sys::signal::kill(NixPid::from_raw(pid), Signal::SIGKILL);
                }
                continue;
            }

            stats.result = VerdictCode::Sc;
            timer::disarm();
            return Err(crate::Error::from(ErrorKind::SupervisorFailed(format!(
                "wait4 failed: {}",
                errno
            ))));
        }

        // wait4 with no WNOHANG never returns 0, but guard against it
        // rather than spinning forever if the platform ever surprises us.
    }
}

fn rusage_cpu_ms(rusage: &libc::rusage) -> u64 {
    let user_ms = rusage.ru_utime.tv_sec as u64 * 1000 + rusage.ru_utime.tv_usec as u64 / 1000;
    let sys_ms = rusage.ru_stime.tv_sec as u64 * 1000 + rusage.ru_stime.tv_usec as u64 / 1000;
    user_ms + sys_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Jail, Limits};
    use std::path::Path;

    fn spawn_and_supervise(
        file: &str,
        args: &[&str],
        limits: Limits,
    ) -> Option<ProcessDescriptor> {
        let mut desc = ProcessDescriptor::new(Path::new(file), limits, Jail::default());
        for a in args {
            desc.add_arg(a).unwrap();
        }
        if desc.spawn().is_err() {
            return None; // environment does not permit clone(); skip.
        }
        supervise(&mut desc).unwrap();
        Some(desc)
    }

    #[test]
    fn clean_exit_is_ok() {
        let limits = Limits::new(5000, 5000, 262144).unwrap();
        if let Some(desc) = spawn_and_supervise("/bin/true", &[], limits) {
            assert_eq!(VerdictCode::Ok, desc.stats().result);
        }
    }

    #[test]
    fn nonzero_exit_is_re() {
        let limits = Limits::new(5000, 5000, 262144).unwrap();
        if let Some(desc) =
            spawn_and_supervise("/bin/sh", &["-c", "exit 7"], limits)
        {
            assert_eq!(VerdictCode::Re, desc.stats().result);
        }
    }

    #[test]
    fn cpu_spin_hits_time_limit() {
        let limits = Limits::new(100, 5000, 262144).unwrap();
        if let Some(desc) =
            spawn_and_supervise("/bin/sh", &["-c", "while :; do :; done"], limits)
        {
            assert_eq!(VerdictCode::Tl, desc.stats().result);
            assert!(desc.stats().cpu_ms > 0 || desc.stats().wall_ms > 0);
        }
    }

    #[test]
    fn sleep_hits_wall_limit() {
        let limits = Limits::new(5000, 200, 262144).unwrap();
        if let Some(desc) = spawn_and_supervise("/bin/sleep", &["5"], limits) {
            assert_eq!(VerdictCode::Tl, desc.stats().result);
            assert!(desc.stats().wall_ms > 200);
        }
    }
}
