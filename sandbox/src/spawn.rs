//! Constructs an isolated child: clones with optional new namespaces,
//! installs a parent-death signal, closes inherited descriptors, enters
//! the jail (chroot -> chdir -> stream redirection), drops privileges
//! (uid/gid, Linux capabilities, `no_new_privs`), optionally loads a
//! seccomp allow-list, and finally replaces itself with the target
//! program.
//!
//! Step order here is load-bearing; see spec for why (e.g. stream
//! redirection must happen before the privilege drop, while the caller
//! still has rights to open the target files).

use std::fs::{File, OpenOptions};
use std::os::unix::io::IntoRawFd;

use nix::sched::{self, CloneFlags};
use nix::sys::signal::Signal;
use nix::unistd::{self, Uid};

use crate::{caps, seccomp, ErrorKind, ProcessDescriptor, Result};

/// Process identifier type used throughout this crate.
pub type Pid = i32;

/// Size, in bytes, of the stack handed to `clone`. The child immediately
/// `exec`s, so a single page plus a guard page below it is sufficient.
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// A small guarded stack mapping for the cloned child. The page below the
/// usable stack is mapped `PROT_NONE` so a stack overflow (which cannot
/// legitimately happen here, since the child execs immediately) traps
/// instead of silently corrupting adjacent memory — a safer analogue of
/// the original's one-page `alloca`.
struct GuardedStack {
    base: *mut libc::c_void,
    total_len: usize,
    page_len: usize,
}

impl GuardedStack {
    fn new() -> std::io::Result<GuardedStack> {
        let page_len = page_size();
        let total_len = page_len * 2;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        let guard_ret = unsafe { libc::mprotect(base, page_len, libc::PROT_NONE) };
        if guard_ret != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::munmap(base, total_len) };
            return Err(err);
        }

        Ok(GuardedStack { base, total_len, page_len })
    }

    /// The usable (non-guard) region of the mapping.
    fn usable_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(
                (self.base as *mut u8).add(self.page_len),
                self.page_len,
            )
        }
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.total_len);
        }
    }
}

/// Set close-on-exec on every inherited descriptor under `/proc/self/fd`
/// except 0, 1, 2 and the directory fd used to iterate. Failures here are
/// warnings, not fatal: a stray leaked descriptor is not worth aborting
/// child startup over.
fn close_inherited_fds() {
    let dir = match std::fs::read_dir("/proc/self/fd") {
        Ok(d) => d,
        Err(e) => {
            log::warn!("failed to open /proc/self/fd, cannot check for inherited fds: {}", e);
            return;
        }
    };

    for entry in dir {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let fd: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(fd) => fd,
            None => continue,
        };
        if fd == 0 || fd == 1 || fd == 2 {
            continue;
        }

        let ret = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        if ret == -1 {
            log::warn!("failed to set close-on-exec on inherited fd {}", fd);
        }
    }
}

/// Abort the child after logging `msg`. Any partial-setup error in the
/// child must not permit `execvp` to run; the parent will observe a
/// signaled status and classify it as `Re`.
fn fail(msg: &str) -> ! {
    log::error!("{}", msg);
    std::process::abort();
}

fn enter_jail(desc: &ProcessDescriptor) {
    if let Some(ref hostname) = desc.jail.hostname {
        if unistd::sethostname(hostname).is_err() {
            fail("failed to set hostname");
        }
    }

    if let Some(ref chroot_path) = desc.jail.chroot_path {
        if unistd::chroot(chroot_path).is_err() {
            fail("failed to chroot");
        }
    }

    if let Some(ref chdir_path) = desc.jail.chdir_path {
        if unistd::chdir(chdir_path).is_err() {
            fail("failed to chdir");
        }
    }
}

/// Open redirection targets and dup2 them over the standard streams.
/// Must run before privilege drop, while the process still holds whatever
/// rights are needed to open the target files (which may live inside a
/// freshly-entered chroot that the post-drop uid cannot write to).
fn apply_redirections(desc: &ProcessDescriptor) {
    if let Some(ref path) = desc.jail.redirect_stdin {
        match File::open(path) {
            Ok(f) => {
                if unistd::dup2(f.into_raw_fd(), libc::STDIN_FILENO).is_err() {
                    fail("failed to redirect stdin");
                }
            }
            Err(_) => fail("failed to open stdin redirection target"),
        }
    }

    if let Some(ref path) = desc.jail.redirect_stdout {
        match OpenOptions::new().write(true).create(true).truncate(true).open(path) {
            Ok(f) => {
                if unistd::dup2(f.into_raw_fd(), libc::STDOUT_FILENO).is_err() {
                    fail("failed to redirect stdout");
                }
            }
            Err(_) => fail("failed to open stdout redirection target"),
        }
    }

    if let Some(ref path) = desc.jail.redirect_stderr {
        match OpenOptions::new().write(true).create(true).truncate(true).open(path) {
            Ok(f) => {
                if unistd::dup2(f.into_raw_fd(), libc::STDERR_FILENO).is_err() {
                    fail("failed to redirect stderr");
                }
            }
            Err(_) => fail("failed to open stderr redirection target"),
        }
    }
}

/// Reset gid and uid. `override_uid`, when set, is the target uid to drop
/// to instead of the real caller's uid (the gid is still reset to the
/// real caller's gid either way — this only changes which unprivileged
/// account the child ends up running as, not whether privileges are
/// dropped).
fn drop_privileges(override_uid: Option<u32>) {
    let gid = unistd::getgid();
    if unistd::setgid(gid).is_err() {
        fail("failed to setgid");
    }

    let uid = override_uid.map(Uid::from_raw).unwrap_or_else(unistd::getuid);
    if unistd::setuid(uid).is_err() {
        fail("failed to setuid");
    }

    if caps::drop_all().is_err() {
        fail("failed to drop capabilities");
    }

    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret == -1 {
        log::warn!("failed to set PR_SET_NO_NEW_PRIVS");
    }
}

/// Runs inside the cloned child. Never returns on success (it execs);
/// aborts on any unrecoverable setup failure.
fn child_entry(desc: &ProcessDescriptor) -> isize {
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0);
    }
    close_inherited_fds();

    enter_jail(desc);
    apply_redirections(desc);
    drop_privileges(desc.uid);

    if desc.jail.use_seccomp {
        if let Err(e) = seccomp::load_allow_list() {
            fail(&format!("failed to load seccomp filter: {}", e));
        }
    }

    // Apply any explicitly-added/inherited environment variables onto the
    // child's own environment rather than building a custom envp: like the
    // original, we rely on `execvp`'s implicit inheritance of the calling
    // process's environment, only overlaying what the caller asked for.
    for (name, value) in desc.envs() {
        std::env::set_var(name, value);
    }

    let argv = desc.native_argv();

    match unistd::execvp(&argv[0], argv.as_ref()) {
        Ok(_) => unreachable!("execvp does not return on success"),
        Err(e) => {
            log::error!("failed to exec {:?}: {}", desc.file(), e);
            std::process::exit(1);
        }
    }
}

/// Spawn `desc` as a supervised child, returning its pid.
pub fn spawn(desc: &mut ProcessDescriptor) -> Result<Pid> {
    let mut flags = CloneFlags::empty();
    if desc.jail.use_namespaces {
        flags.insert(CloneFlags::CLONE_NEWUTS);
        flags.insert(CloneFlags::CLONE_NEWPID);
        flags.insert(CloneFlags::CLONE_NEWIPC);
        flags.insert(CloneFlags::CLONE_NEWNET);
    }

    let mut stack = GuardedStack::new()?;
    let desc_ptr: *const ProcessDescriptor = desc;

    let cb = Box::new(move || child_entry(unsafe { &*desc_ptr }));

    let pid = unsafe {
        sched::clone(cb, stack.usable_mut(), flags, Some(Signal::SIGCHLD as i32))
    }
    .map_err(|_| ErrorKind::ChildStartupFailed)?;

    Ok(pid.as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Jail, Limits};
    use std::path::Path;

    #[test]
    fn spawn_true_runs_to_completion() {
        let limits = Limits::new(5000, 5000, 65536).unwrap();
        let mut desc = ProcessDescriptor::new(Path::new("/bin/true"), limits, Jail::default());

        let pid = match desc.spawn() {
            Ok(pid) => pid,
            Err(_) => return, // environment may not permit clone(); skip.
        };

        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        assert!(libc::WIFEXITED(status));
    }

    #[test]
    fn spawn_redirects_stdout_to_file() {
        let out = tempfile::NamedTempFile::new().unwrap();
        let limits = Limits::new(5000, 5000, 65536).unwrap();
        let mut jail = Jail::default();
        jail.redirect_stdout = Some(out.path().to_path_buf());

        let mut desc = ProcessDescriptor::new(Path::new("/bin/echo"), limits, jail);
        desc.add_arg("hello").unwrap();

        let pid = match desc.spawn() {
            Ok(pid) => pid,
            Err(_) => return, // environment may not permit clone(); skip.
        };

        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        assert!(libc::WIFEXITED(status));

        let contents = std::fs::read_to_string(out.path()).unwrap();
        assert_eq!("hello\n", contents);
    }
}
