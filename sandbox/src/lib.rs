//! This crate implements a sandbox for running an untrusted program under a
//! declared envelope of resource limits and jail isolation primitives.
//!
//! The sandbox implements:
//!
//! * A spawner that clones an isolated child, enters the jail (chroot,
//! working directory, stream redirection), drops privileges and seccomp,
//! and finally `execvp`s the target program;
//!
//! * A hypervisor: a single-threaded supervisor loop that polls `/proc` for
//! the child's resource consumption, wakes up on a real-time interval timer
//! between `wait4` calls, and kills the child as soon as any budget is
//! exceeded;
//!
//! * A verdict classifier turning (exit status, CPU time, wall time, peak
//! memory) plus the declared limits into one of six result codes.
//!

#[macro_use]
extern crate error_chain;
extern crate libc;
extern crate nix;
extern crate seccomp_sys;

mod caps;
mod classifier;
mod proc_reader;
mod seccomp;
mod spawn;
mod timer;

pub mod hypervisor;

use std::ffi::CString;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub use spawn::Pid;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        Nix(::nix::Error);
        Seccomp(seccomp::SeccompError);
    }

    errors {
        InvalidLimits(reason: String) {
            description("invalid resource limits")
            display("invalid resource limits: {}", reason)
        }

        InvalidProcessArgument(arg: String) {
            description("invalid argv entry")
            display("invalid argv entry: {:?}", arg)
        }

        InvalidEnvironmentVariable(env: String) {
            description("invalid environment variable")
            display("invalid environment variable: {:?}", env)
        }

        ChildStartupFailed {
            description("child process failed to start")
        }

        SupervisorFailed(reason: String) {
            description("supervisor encountered an internal error")
            display("supervisor encountered an internal error: {}", reason)
        }
    }
}

/// Resource budgets enforced by the hypervisor. All three fields are
/// strictly positive; construction validates them so that every `Limits`
/// value in circulation is already sound.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Budget for user+system CPU time, in milliseconds.
    cpu_ms: u64,

    /// Budget for wall-clock time since spawn, in milliseconds.
    wall_ms: u64,

    /// Budget for peak resident set size, in kilobytes.
    mem_kb: u64,
}

impl Limits {
    /// Create a new `Limits` value, validating that `cpu_ms >= 10`,
    /// `wall_ms >= 10` and `mem_kb >= 1`.
    pub fn new(cpu_ms: u64, wall_ms: u64, mem_kb: u64) -> Result<Limits> {
        if cpu_ms < 10 {
            bail!(ErrorKind::InvalidLimits("cpu_ms must be at least 10 ms".to_owned()));
        }
        if wall_ms < 10 {
            bail!(ErrorKind::InvalidLimits("wall_ms must be at least 10 ms".to_owned()));
        }
        if mem_kb < 1 {
            bail!(ErrorKind::InvalidLimits("mem_kb must be at least 1 kB".to_owned()));
        }

        Ok(Limits { cpu_ms, wall_ms, mem_kb })
    }

    pub fn cpu_ms(&self) -> u64 {
        self.cpu_ms
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn mem_kb(&self) -> u64 {
        self.mem_kb
    }
}

/// Isolation primitives applied to the child before it execs the target
/// program.
#[derive(Clone, Debug, Default)]
pub struct Jail {
    /// Directory to `chroot` into. `None` means no chroot.
    pub chroot_path: Option<PathBuf>,

    /// Directory to `chdir` into, evaluated after the chroot. `None` means
    /// no chdir.
    pub chdir_path: Option<PathBuf>,

    /// Hostname to set inside the new UTS namespace. Only meaningful when
    /// `use_namespaces` is set.
    pub hostname: Option<String>,

    /// Whether to clone the child into new UTS/PID/IPC/NET namespaces.
    pub use_namespaces: bool,

    /// Whether to load the seccomp allow-list filter before exec.
    pub use_seccomp: bool,

    /// Path to open (read-only) and dup2 over stdin, after entering the
    /// chroot but before privilege drop.
    pub redirect_stdin: Option<PathBuf>,

    /// Path to create/truncate and dup2 over stdout.
    pub redirect_stdout: Option<PathBuf>,

    /// Path to create/truncate and dup2 over stderr.
    pub redirect_stderr: Option<PathBuf>,
}

/// Raw exit status word as returned by `wait4`/`waitpid`, kept opaque so
/// callers that want `WIFEXITED`/`WTERMSIG`-style inspection can do it
/// themselves without this crate committing to a particular decoding.
pub type RawStatus = i32;

/// The six result codes a sandboxed run can be classified into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerdictCode {
    /// Clean exit, status 0.
    Ok = 0,

    /// Non-zero exit, or killed by any signal other than `SIGSYS`, or a
    /// spawner failure at exec time.
    Re = 1,

    /// CPU or wall-clock time limit exceeded.
    Tl = 2,

    /// Memory limit exceeded.
    Ml = 3,

    /// Killed by `SIGSYS` as a result of the seccomp filter.
    Sv = 4,

    /// Supervisor-internal failure.
    Sc = 5,
}

impl VerdictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictCode::Ok => "OK",
            VerdictCode::Re => "RE",
            VerdictCode::Tl => "TL",
            VerdictCode::Ml => "ML",
            VerdictCode::Sv => "SV",
            VerdictCode::Sc => "SC",
        }
    }
}

impl Display for VerdictCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for VerdictCode {
    fn default() -> VerdictCode {
        VerdictCode::Ok
    }
}

/// Monotonically-updated run statistics. See `classifier` for the rules
/// governing how `result` may change over the lifetime of a run.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    /// User+system CPU time consumed so far, in milliseconds.
    pub cpu_ms: u64,

    /// Wall-clock time elapsed since `start_wall_ms`, in milliseconds.
    pub wall_ms: u64,

    /// High-water resident set size observed so far, in kilobytes.
    pub peak_mem_kb: u64,

    /// Epoch timestamp (milliseconds) captured immediately before spawn.
    pub start_wall_ms: u64,

    /// Raw wait status of the child, valid once the child has been reaped.
    pub status: RawStatus,

    /// Current verdict. See `classifier` module for the stickiness rules.
    pub result: VerdictCode,
}

impl Stats {
    /// Create a fresh `Stats` value with `start_wall_ms` captured as "now".
    pub fn new() -> Stats {
        Stats {
            start_wall_ms: now_ms(),
            ..Default::default()
        }
    }

    /// Wall-clock time elapsed between `start_wall_ms` and `now_ms`,
    /// saturating at zero if `now_ms` somehow precedes the start.
    pub fn elapsed_wall(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_wall_ms)
    }
}

/// Current epoch time in milliseconds, used as the wall-clock reference.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Check whether `s` is a valid argv/env entry: it must not contain an
/// embedded NUL byte (C strings cannot represent that).
fn is_valid_c_string(s: &str) -> bool {
    !s.as_bytes().contains(&b'\0')
}

/// Owns the limits, jail description and argv/envs of a to-be-spawned
/// process, and accumulates its pid and stats once spawned.
pub struct ProcessDescriptor {
    file: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,

    pub limits: Limits,
    pub jail: Jail,

    /// Effective uid the child should end up running as, after the
    /// mandatory drop to the real uid/gid. `None` keeps the real uid.
    pub uid: Option<u32>,

    pid: Option<Pid>,
    stats: Stats,
}

impl ProcessDescriptor {
    /// Create a new descriptor for running `file` with the given resource
    /// limits and jail description.
    pub fn new(file: &Path, limits: Limits, jail: Jail) -> ProcessDescriptor {
        ProcessDescriptor {
            file: file.to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            limits,
            jail,
            uid: None,
            pid: None,
            stats: Stats::new(),
        }
    }

    /// Append an argument to the child's argv. `argv[0]` is always `file`;
    /// arguments added here follow it.
    pub fn add_arg(&mut self, arg: &str) -> Result<()> {
        if !is_valid_c_string(arg) {
            bail!(ErrorKind::InvalidProcessArgument(arg.to_owned()));
        }
        self.args.push(arg.to_owned());
        Ok(())
    }

    /// Add an environment variable to the child's environment.
    pub fn add_env(&mut self, name: &str, value: &str) -> Result<()> {
        if !is_valid_c_string(name) || name.as_bytes().contains(&b'=') {
            bail!(ErrorKind::InvalidEnvironmentVariable(name.to_owned()));
        }
        if !is_valid_c_string(value) {
            bail!(ErrorKind::InvalidEnvironmentVariable(value.to_owned()));
        }
        self.envs.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    /// Copy every environment variable of the calling process into the
    /// child's environment.
    pub fn inherit_env(&mut self) {
        for (name, value) in std::env::vars() {
            self.add_env(&name, &value)
                .expect("invalid environment variable in current process");
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Build the native argv (argv[0] followed by `self.args`) as
    /// `CString`s, suitable for `execvp`.
    fn native_argv(&self) -> Vec<CString> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(CString::new(self.file.as_os_str().to_str().unwrap()).unwrap());
        argv.extend(self.args.iter().map(|a| CString::new(a.clone()).unwrap()));
        argv
    }

    /// Spawn the child via `spawn::spawn`, recording its pid. This records
    /// `stats.start_wall_ms` immediately before the clone, per spec: the
    /// hypervisor, not the spawner, owns the authoritative start time.
    pub fn spawn(&mut self) -> Result<Pid> {
        self.stats = Stats::new();
        let pid = spawn::spawn(self)?;
        self.pid = Some(pid);
        Ok(pid)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_reject_too_small_cpu() {
        assert!(Limits::new(9, 1000, 1024).is_err());
    }

    #[test]
    fn elapsed_wall_is_difference_from_start() {
        let mut stats = Stats::new();
        stats.start_wall_ms = 1_000;
        assert_eq!(500, stats.elapsed_wall(1_500));
    }

    #[test]
    fn elapsed_wall_saturates_at_zero() {
        let mut stats = Stats::new();
        stats.start_wall_ms = 1_000;
        assert_eq!(0, stats.elapsed_wall(500));
    }

    #[test]
    fn limits_reject_too_small_wall() {
        assert!(Limits::new(1000, 9, 1024).is_err());
    }

    #[test]
    fn limits_reject_zero_memory() {
        assert!(Limits::new(1000, 1000, 0).is_err());
    }

    #[test]
    fn limits_accept_boundary_values() {
        let limits = Limits::new(10, 10, 1).unwrap();
        assert_eq!(10, limits.cpu_ms());
        assert_eq!(10, limits.wall_ms());
        assert_eq!(1, limits.mem_kb());
    }

    #[test]
    fn descriptor_rejects_nul_argument() {
        let limits = Limits::new(1000, 1000, 1024).unwrap();
        let mut desc = ProcessDescriptor::new(Path::new("/bin/true"), limits, Jail::default());
        assert!(desc.add_arg("bad\0arg").is_err());
    }

    #[test]
    fn descriptor_rejects_env_with_equals_in_name() {
        let limits = Limits::new(1000, 1000, 1024).unwrap();
        let mut desc = ProcessDescriptor::new(Path::new("/bin/true"), limits, Jail::default());
        assert!(desc.add_env("BAD=NAME", "value").is_err());
    }

    #[test]
    fn verdict_code_as_str_matches_display() {
        for code in &[
            VerdictCode::Ok,
            VerdictCode::Re,
            VerdictCode::Tl,
            VerdictCode::Ml,
            VerdictCode::Sv,
            VerdictCode::Sc,
        ] {
            assert_eq!(code.as_str(), format!("{}", code));
        }
    }
}
