//! Pure functions turning observed (exit status, CPU time, wall time, peak
//! memory) plus the declared `Limits` into a `VerdictCode`.
//!
//! Stickiness rule: once `result` leaves `VerdictCode::Ok` it is never
//! reverted by `check_cpu`/`check_wall`/`check_mem`. Only
//! `check_exit_status` may overwrite it, and only when the previous value
//! was still `Ok` — first detected violation wins, except that the final
//! wait-status classification can promote a still-clean verdict to `Re`/`Sv`.

use crate::{Limits, RawStatus, Stats, VerdictCode};

impl Stats {
    /// Classify the final wait status of the child. Leaves `result`
    /// untouched if it is already non-`Ok` (a limit was already hit).
    /// Otherwise: non-zero exit -> `Re`; killed by `SIGSYS` -> `Sv`; killed
    /// by any other signal -> `Re`; clean exit -> `Ok`.
    pub fn check_exit_status(&mut self, status: RawStatus) {
        self.status = status;
        if self.result != VerdictCode::Ok {
            return;
        }

        self.result = classify_wait_status(status);
    }

    /// Record the latest observed CPU time and, if still `Ok`, promote to
    /// `Tl` when it exceeds `limits.cpu_ms()`. The comparison is strict:
    /// `cpu_ms == limits.cpu_ms()` stays `Ok`.
    pub fn check_cpu(&mut self, limits: &Limits, cpu_ms: u64) {
        self.cpu_ms = cpu_ms;
        if self.result == VerdictCode::Ok && cpu_ms > limits.cpu_ms() {
            self.result = VerdictCode::Tl;
        }
    }

    /// Sample wall-clock time elapsed since `start_wall_ms` and, if still
    /// `Ok`, promote to `Tl` when it exceeds `limits.wall_ms()`.
    pub fn check_wall(&mut self, limits: &Limits) {
        let wall_ms = self.elapsed_wall(crate::now_ms());
        self.wall_ms = wall_ms;
        if self.result == VerdictCode::Ok && wall_ms > limits.wall_ms() {
            self.result = VerdictCode::Tl;
        }
    }

    /// Update the high-water mark of resident memory and, if still `Ok`,
    /// promote to `Ml` when the peak exceeds `limits.mem_kb()`.
    pub fn check_mem(&mut self, limits: &Limits, mem_kb: u64) {
        if mem_kb > self.peak_mem_kb {
            self.peak_mem_kb = mem_kb;
        }
        if self.result == VerdictCode::Ok && self.peak_mem_kb > limits.mem_kb() {
            self.result = VerdictCode::Ml;
        }
    }
}

/// Decode a raw `wait4`/`waitpid` status word into a verdict, assuming the
/// run was otherwise clean (no limit already tripped).
fn classify_wait_status(status: RawStatus) -> VerdictCode {
    if libc::WIFEXITED(status) {
        if libc::WEXITSTATUS(status) != 0 {
            VerdictCode::Re
        } else {
            VerdictCode::Ok
        }
    } else if libc::WIFSIGNALED(status) {
        if libc::WTERMSIG(status) == libc::SIGSYS {
            VerdictCode::Sv
        } else {
            VerdictCode::Re
        }
    } else {
        VerdictCode::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::new(100, 200, 1024).unwrap()
    }

    #[test]
    fn cpu_boundary_is_ok() {
        let mut stats = Stats::new();
        stats.check_cpu(&limits(), 100);
        assert_eq!(VerdictCode::Ok, stats.result);
    }

    #[test]
    fn cpu_one_over_is_tl() {
        let mut stats = Stats::new();
        stats.check_cpu(&limits(), 101);
        assert_eq!(VerdictCode::Tl, stats.result);
    }

    #[test]
    fn mem_boundary_is_ok() {
        let mut stats = Stats::new();
        stats.check_mem(&limits(), 1024);
        assert_eq!(VerdictCode::Ok, stats.result);
    }

    #[test]
    fn mem_one_over_is_ml() {
        let mut stats = Stats::new();
        stats.check_mem(&limits(), 1025);
        assert_eq!(VerdictCode::Ml, stats.result);
    }

    #[test]
    fn mem_peak_is_monotonic() {
        let mut stats = Stats::new();
        stats.check_mem(&limits(), 500);
        stats.check_mem(&limits(), 300);
        assert_eq!(500, stats.peak_mem_kb);
        stats.check_mem(&limits(), 500);
        assert_eq!(500, stats.peak_mem_kb);
    }

    #[test]
    fn result_is_sticky_across_checks() {
        let mut stats = Stats::new();
        stats.check_cpu(&limits(), 1000); // TL
        assert_eq!(VerdictCode::Tl, stats.result);

        stats.check_mem(&limits(), 1); // must not clear TL
        assert_eq!(VerdictCode::Tl, stats.result);

        // A clean wait status must not un-stick a TL verdict either.
        let exited_zero = exited_status(0);
        stats.check_exit_status(exited_zero);
        assert_eq!(VerdictCode::Tl, stats.result);
    }

    #[test]
    fn exit_status_promotes_ok_to_re_on_nonzero_exit() {
        let mut stats = Stats::new();
        stats.check_exit_status(exited_status(7));
        assert_eq!(VerdictCode::Re, stats.result);
    }

    #[test]
    fn exit_status_promotes_ok_to_ok_on_zero_exit() {
        let mut stats = Stats::new();
        stats.check_exit_status(exited_status(0));
        assert_eq!(VerdictCode::Ok, stats.result);
    }

    #[test]
    fn sigsys_always_classifies_as_sv() {
        let mut stats = Stats::new();
        stats.check_exit_status(signaled_status(libc::SIGSYS));
        assert_eq!(VerdictCode::Sv, stats.result);
    }

    #[test]
    fn other_signal_classifies_as_re() {
        let mut stats = Stats::new();
        stats.check_exit_status(signaled_status(libc::SIGKILL));
        assert_eq!(VerdictCode::Re, stats.result);
    }

    /// Build a raw status word as if the process exited normally, matching
    /// the glibc `WIFEXITED`/`WEXITSTATUS` encoding.
    fn exited_status(code: i32) -> RawStatus {
        (code & 0xff) << 8
    }

    /// Build a raw status word as if the process was killed by `sig`.
    fn signaled_status(sig: i32) -> RawStatus {
        sig & 0x7f
    }
}
