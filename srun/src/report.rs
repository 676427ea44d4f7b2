//! Final verdict formatting (C8). The machine format is a single stable
//! line on stderr that downstream tooling greps for; the human format is a
//! five-field summary plus a status phrase, meant for a person at a
//! terminal.

use sandbox::{RawStatus, Stats, VerdictCode};

fn status_phrase(status: RawStatus) -> String {
    if libc::WIFEXITED(status) {
        format!("exited, status={}", libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        format!("killed by signal {} = {}", sig, signal_name(sig))
    } else if libc::WIFSTOPPED(status) {
        format!("stopped by signal {}", libc::WSTOPSIG(status))
    } else {
        "continued".to_owned()
    }
}

fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGBUS => "SIGBUS",
        libc::SIGSYS => "SIGSYS",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        _ => "UNKNOWN",
    }
}

/// The trailing field of the machine report: the decimal exit code if the
/// child exited normally, or the terminating signal's name otherwise.
fn exit_code_or_signame(status: RawStatus) -> String {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status).to_string()
    } else if libc::WIFSIGNALED(status) {
        signal_name(libc::WTERMSIG(status)).to_owned()
    } else {
        "0".to_owned()
    }
}

/// Emit `SRUN_REPORT: ...` to stderr.
pub fn emit_machine(stats: &Stats) {
    eprintln!(
        "SRUN_REPORT: {} {} {} {} {} {} {}",
        stats.result.as_str(),
        stats.result as i32,
        stats.cpu_ms,
        stats.wall_ms,
        stats.peak_mem_kb,
        stats.status,
        exit_code_or_signame(stats.status),
    );
}

/// Emit the five-line-plus-phrase human-readable report to stderr.
pub fn emit_human(stats: &Stats) {
    eprintln!("Result: {}", stats.result);
    eprintln!("Time: {} ms", stats.cpu_ms);
    eprintln!("Real Time: {} ms", stats.wall_ms);
    eprintln!("Memory: {} kB", stats.peak_mem_kb);
    eprintln!("Status: {}", status_phrase(stats.status));
}

pub fn emit(stats: &Stats, human: bool) {
    if human {
        emit_human(stats);
    } else {
        emit_machine(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited_status(code: i32) -> RawStatus {
        (code & 0xff) << 8
    }

    fn signaled_status(sig: i32) -> RawStatus {
        sig & 0x7f
    }

    #[test]
    fn status_phrase_describes_normal_exit() {
        assert_eq!("exited, status=7", status_phrase(exited_status(7)));
    }

    #[test]
    fn status_phrase_names_known_signal() {
        assert_eq!(
            format!("killed by signal {} = SIGKILL", libc::SIGKILL),
            status_phrase(signaled_status(libc::SIGKILL))
        );
    }

    #[test]
    fn exit_code_field_matches_phrase() {
        assert_eq!("7", exit_code_or_signame(exited_status(7)));
        assert_eq!("SIGKILL", exit_code_or_signame(signaled_status(libc::SIGKILL)));
    }

    #[test]
    fn result_as_str_round_trips_through_display() {
        assert_eq!("OK", VerdictCode::Ok.as_str());
    }
}
