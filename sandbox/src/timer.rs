//! A one-shot real-time interval timer used solely to interrupt a blocking
//! `wait4` after a polling quantum so the hypervisor can re-sample `/proc`.
//!
//! The only asynchronously-delivered signal in the supervisor is this
//! timer's `SIGALRM`; its handler is a no-op whose sole purpose is to make
//! the blocked `wait4` return `EINTR`. Nothing in this module relies on
//! handler-side state.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

extern "C" fn sigalrm_handler(_signum: libc::c_int) {
    // Intentionally empty: existing only to perturb `wait4`.
}

/// RAII guard that installs the `SIGALRM` handler on construction and
/// restores whatever disposition was previously in effect on drop,
/// guaranteeing restoration on every exit path out of the hypervisor loop
/// (including the `Sc` branch).
pub struct SupervisorSession {
    previous: SigAction,
}

impl SupervisorSession {
    pub fn start() -> nix::Result<SupervisorSession> {
        let action = SigAction::new(
            SigHandler::Handler(sigalrm_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let previous = unsafe { signal::sigaction(Signal::SIGALRM, &action)? };
        Ok(SupervisorSession { previous })
    }
}

impl Drop for SupervisorSession {
    fn drop(&mut self) {
        // Best-effort: there is nothing sensible to do if restoring the
        // prior disposition fails at shutdown.
        let _ = unsafe { signal::sigaction(Signal::SIGALRM, &self.previous) };
    }
}

/// Arm a one-shot interval timer that fires `SIGALRM` after
/// `microseconds`. The fired signal carries no payload; its only effect is
/// interrupting a concurrently-blocked `wait4`.
pub fn arm(microseconds: i64) {
    let new_value = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval {
            tv_sec: microseconds / 1_000_000,
            tv_usec: microseconds % 1_000_000,
        },
    };
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &new_value, std::ptr::null_mut());
    }
}

/// Disarm the interval timer. Calls `setitimer` with a zeroed value twice
/// in succession: the first call can itself be interrupted by the very
/// signal it is trying to suppress, so a single call is not guaranteed to
/// leave the timer disarmed. Calling it twice is a fixed point — preserved
/// from the original implementation rather than switched to a
/// mask-around-syscall scheme, since it is simpler and equally correct.
pub fn disarm() {
    arm(0);
    arm(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_restores_prior_disposition_on_drop() {
        {
            let _session = SupervisorSession::start().unwrap();
            arm(1000);
            disarm();
        }
        // After the guard drops, re-starting a session must succeed again,
        // i.e. the signal disposition is in a sane state.
        let _session = SupervisorSession::start().unwrap();
    }

    #[test]
    fn disarm_is_idempotent() {
        disarm();
        disarm();
    }
}
