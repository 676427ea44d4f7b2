//! Command-line option table for `srun2`: `srun2 [options] [--] command [args...]`.
//!
//! Boolean options accept a value in `{0, 1, on, off}` rather than being
//! bare presence flags, matching the original program's generic option
//! parser. `clap` only gives us presence-style flags for free, so boolean
//! options are modeled as `takes_value(true)` arguments with a custom
//! validator.

use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, ErrorKind, Result};

/// Parsed command-line configuration, mirroring the `process_t` fields the
/// original program's parser populates directly.
pub struct Config {
    pub chdir: Option<PathBuf>,
    pub chroot: Option<PathBuf>,
    pub mem_kb: u64,
    pub cpu_ms: u64,
    pub wall_ms: u64,
    pub use_seccomp: bool,
    pub use_namespaces: bool,
    pub human: bool,
    pub redirect_stdin: Option<PathBuf>,
    pub redirect_stdout: Option<PathBuf>,
    pub redirect_stderr: Option<PathBuf>,
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Parse a boolean value in `{0, 1, on, off}`, as used by the original
/// program's generic option parser.
fn parse_bool(s: &str) -> std::result::Result<bool, String> {
    match s {
        "0" | "off" => Ok(false),
        "1" | "on" => Ok(true),
        _ => Err(format!("invalid boolean value {:?}, expected one of 0, 1, on, off", s)),
    }
}

fn validate_bool(s: String) -> std::result::Result<(), String> {
    parse_bool(&s).map(|_| ())
}

fn validate_u64(s: String) -> std::result::Result<(), String> {
    u64::from_str(&s)
        .map(|_| ())
        .map_err(|_| format!("invalid integer value: {:?}", s))
}

fn build_app<'a, 'b>() -> clap::App<'a, 'b> {
    clap::App::new("srun2")
        .version("0.1")
        .about("Run a command under CPU/wall/memory limits and an optional jail")
        .setting(clap::AppSettings::DisableVersion)
        .arg(clap::Arg::with_name("chdir")
            .long("chdir")
            .short("d")
            .takes_value(true)
            .help("Change directory to dir (done after chroot)"))
        .arg(clap::Arg::with_name("chroot")
            .long("chroot")
            .short("c")
            .takes_value(true)
            .help("Do a chroot"))
        .arg(clap::Arg::with_name("mem")
            .long("mem")
            .short("m")
            .takes_value(true)
            .validator(validate_u64)
            .help("Limit memory usage (in Kbytes)"))
        .arg(clap::Arg::with_name("time")
            .long("time")
            .short("t")
            .takes_value(true)
            .validator(validate_u64)
            .help("Limit user+system execution time (in ms)"))
        .arg(clap::Arg::with_name("real_time")
            .long("real_time")
            .short("r")
            .takes_value(true)
            .validator(validate_u64)
            .help("Limit real execution time (in ms)"))
        .arg(clap::Arg::with_name("seccomp")
            .long("seccomp")
            .short("s")
            .takes_value(true)
            .validator(validate_bool)
            .help("Use seccomp to ensure security"))
        .arg(clap::Arg::with_name("usens")
            .long("usens")
            .short("n")
            .takes_value(true)
            .validator(validate_bool)
            .help("Use namespaces to ensure security (adds clone overhead)"))
        .arg(clap::Arg::with_name("human")
            .long("human")
            .short("h")
            .takes_value(true)
            .validator(validate_bool)
            .help("Use human-readable output"))
        .arg(clap::Arg::with_name("redirect_stdin")
            .long("redirect-stdin")
            .takes_value(true)
            .help("Redirect stdin to file (after chroot and chdir)"))
        .arg(clap::Arg::with_name("redirect_stdout")
            .long("redirect-stdout")
            .takes_value(true)
            .help("Redirect stdout to file (after chroot and chdir)"))
        .arg(clap::Arg::with_name("redirect_stderr")
            .long("redirect-stderr")
            .takes_value(true)
            .help("Redirect stderr to file (after chroot and chdir)"))
        .arg(clap::Arg::with_name("command")
            .value_name("command")
            .multiple(true)
            .required(true))
        .help_short("H")
}

/// Parse `argv` (excluding argv[0]) into a `Config`. On any parse error,
/// clap has already printed its usage message to stderr; this function
/// turns that into `Err` so the caller can exit with code 1.
pub fn parse(args: &[String]) -> Result<Config> {
    let matches = build_app()
        .get_matches_from_safe(std::iter::once("srun2".to_owned()).chain(args.iter().cloned()))
        .map_err(|e| Error::from(e.to_string()))?;

    let command: Vec<&str> = matches.values_of("command").unwrap().collect();
    let program = PathBuf::from(command[0]);
    let args: Vec<String> = command[1..].iter().map(|s| (*s).to_owned()).collect();

    let mem_kb = matches
        .value_of("mem")
        .map(|v| u64::from_str(v).unwrap())
        .unwrap_or(100 * 1024);
    let cpu_ms = matches
        .value_of("time")
        .map(|v| u64::from_str(v).unwrap())
        .unwrap_or(2000);
    let wall_ms = matches
        .value_of("real_time")
        .map(|v| u64::from_str(v).unwrap())
        .unwrap_or(4000);

    let use_seccomp = matches
        .value_of("seccomp")
        .map(|v| parse_bool(v).unwrap())
        .unwrap_or(false);
    // The original program defaults namespace isolation to *on*.
    let use_namespaces = matches
        .value_of("usens")
        .map(|v| parse_bool(v).unwrap())
        .unwrap_or(true);
    let human = matches
        .value_of("human")
        .map(|v| parse_bool(v).unwrap())
        .unwrap_or(false);

    if mem_kb < 1 {
        bail!(ErrorKind::InvalidArgument("memory limit is too small".to_owned()));
    }
    if cpu_ms < 10 {
        bail!(ErrorKind::InvalidArgument(
            "time limit is too small, must be at least 10 ms".to_owned()
        ));
    }
    if wall_ms < 10 {
        bail!(ErrorKind::InvalidArgument(
            "real time limit is too small, must be at least 10 ms".to_owned()
        ));
    }

    Ok(Config {
        chdir: matches.value_of("chdir").map(PathBuf::from),
        chroot: matches.value_of("chroot").map(PathBuf::from),
        mem_kb,
        cpu_ms,
        wall_ms,
        use_seccomp,
        use_namespaces,
        human,
        redirect_stdin: matches.value_of("redirect_stdin").map(PathBuf::from),
        redirect_stdout: matches.value_of("redirect_stdout").map(PathBuf::from),
        redirect_stderr: matches.value_of("redirect_stderr").map(PathBuf::from),
        program,
        args,
    })
}

/// Print usage/help to stderr, matching the original's `help_and_exit`.
pub fn print_help_and_report_format() {
    let mut app = build_app();
    let _ = app.write_long_help(&mut std::io::stderr());
    eprintln!();
    eprintln!("If --human is not used, then format is:");
    eprintln!(
        "SRUN_REPORT: {{string_result}} {{result}} {{time}} {{real_time}} {{mem}} {{status}} {{exit_code_or_string_description_for_signal}}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_table() {
        assert_eq!(Ok(false), parse_bool("0"));
        assert_eq!(Ok(true), parse_bool("1"));
        assert_eq!(Ok(false), parse_bool("off"));
        assert_eq!(Ok(true), parse_bool("on"));
    }

    #[test]
    fn parse_bool_rejects_garbage() {
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn parse_defaults_match_original_program() {
        let args: Vec<String> = vec!["/bin/true".to_owned()];
        let cfg = parse(&args).unwrap();
        assert_eq!(100 * 1024, cfg.mem_kb);
        assert_eq!(2000, cfg.cpu_ms);
        assert_eq!(4000, cfg.wall_ms);
        assert!(cfg.use_namespaces);
        assert!(!cfg.use_seccomp);
        assert!(!cfg.human);
    }

    #[test]
    fn parse_collects_program_args() {
        let args: Vec<String> =
            vec!["/bin/sh".to_owned(), "-c".to_owned(), "exit 7".to_owned()];
        let cfg = parse(&args).unwrap();
        assert_eq!(PathBuf::from("/bin/sh"), cfg.program);
        assert_eq!(vec!["-c".to_owned(), "exit 7".to_owned()], cfg.args);
    }

    #[test]
    fn parse_rejects_tiny_time_limit() {
        let args: Vec<String> =
            vec!["-t".to_owned(), "1".to_owned(), "/bin/true".to_owned()];
        assert!(parse(&args).is_err());
    }
}
