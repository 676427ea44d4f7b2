//! `env_helper create <path>` / `env_helper remove <path>`.
//!
//! Builds or tears down a bind-mounted root skeleton (`/usr`, `/lib`,
//! `/lib64`, `/bin`, read-only) under `path`, for use as a chroot target.
//! Must be installed setuid-root: the effective uid is dropped to the
//! real uid immediately on startup and only restored around the two
//! syscalls that require privilege, `mount` and `umount2`.
//!
//! Error reporting here is deliberately `eprintln!` plus `exit(1)`, not
//! the `log`-based machinery the rest of the workspace uses: this binary
//! runs setuid and its failure mode is a human operator reading a
//! terminal, not a supervised process whose stderr is captured by a log
//! pipeline.

use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{self, Uid};

const MOUNT_DIRS: &[&str] = &["usr", "lib", "lib64", "bin"];

/// Saved real/effective uids, captured before the mandatory drop to the
/// real uid. `elevate`/`restore` toggle back and forth around the
/// `mount`/`umount2` calls that actually need the root effective uid.
struct SuidGuard {
    real: Uid,
    effective: Uid,
}

impl SuidGuard {
    fn capture() -> SuidGuard {
        SuidGuard {
            real: unistd::getuid(),
            effective: unistd::geteuid(),
        }
    }

    fn drop_privileges(&self) {
        if unistd::seteuid(self.real).is_err() {
            fail("couldn't set euid");
        }
    }

    fn elevate(&self) {
        if unistd::seteuid(self.effective).is_err() {
            fail("couldn't set euid");
        }
    }

    fn restore(&self) {
        if unistd::seteuid(self.real).is_err() {
            fail("couldn't set euid");
        }
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("error: {}: {}", msg, std::io::Error::last_os_error());
    std::process::exit(1);
}

fn directory_exists(path: &Path) -> bool {
    path.is_dir()
}

fn bind_dir(env: &SuidGuard, path_to_env: &Path, dir: &str, readonly: bool) {
    let full_path = path_to_env.join(dir);
    let source = PathBuf::from("/").join(dir);

    if std::fs::create_dir(&full_path).is_err() {
        fail(&format!("error creating {}", full_path.display()));
    }

    let mut flags = MsFlags::MS_BIND | MsFlags::MS_NOSUID;
    if readonly {
        flags |= MsFlags::MS_RDONLY;
    }

    env.elevate();

    if mount(Some(&source), &full_path, None::<&str>, flags, None::<&str>).is_err() {
        fail(&format!("error mounting {}", full_path.display()));
    }

    if readonly {
        let remount_flags = MsFlags::MS_REMOUNT | flags;
        if mount(None::<&str>, &full_path, None::<&str>, remount_flags, None::<&str>).is_err() {
            fail(&format!("error read-only remounting {}", full_path.display()));
        }
    }

    env.restore();
}

fn unbind_dir(env: &SuidGuard, path_to_env: &Path, dir: &str) {
    let full_path = path_to_env.join(dir);

    env.elevate();
    if umount2(&full_path, MntFlags::MNT_FORCE | MntFlags::UMOUNT_NOFOLLOW).is_err() {
        fail(&format!("error unmounting {}", full_path.display()));
    }
    env.restore();

    if std::fs::remove_dir(&full_path).is_err() {
        fail(&format!("error removing dir {}", full_path.display()));
    }
}

fn create_env(env: &SuidGuard, path_to_env: &Path) {
    match std::fs::create_dir(path_to_env) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(_) => fail(&format!("can't create directory for new env {}", path_to_env.display())),
    }

    for dir in MOUNT_DIRS {
        let source = PathBuf::from("/").join(dir);
        if directory_exists(&source) {
            bind_dir(env, path_to_env, dir, true);
        }
    }
}

fn remove_env(env: &SuidGuard, path_to_env: &Path) {
    for dir in MOUNT_DIRS {
        unbind_dir(env, path_to_env, dir);
    }
}

fn print_help(cmd: &str) {
    eprintln!("Usage:");
    eprintln!("    {} create env_path", cmd);
    eprintln!("    {} remove env_path", cmd);
    eprintln!();
    eprintln!("Creates or removes a bind-mounted chroot skeleton.");
    eprintln!("Expected to be run as a setuid-root program.");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        print_help(&args[0]);
        std::process::exit(1);
    }

    let env = SuidGuard::capture();
    env.drop_privileges();

    let path_to_env = PathBuf::from(&args[2]);

    match args[1].as_str() {
        "create" => create_env(&env, &path_to_env),
        "remove" => remove_env(&env, &path_to_env),
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_dirs_matches_original_skeleton() {
        assert_eq!(&["usr", "lib", "lib64", "bin"], MOUNT_DIRS);
    }

    #[test]
    fn directory_exists_is_false_for_missing_path() {
        assert!(!directory_exists(Path::new("/this/path/does/not/exist/srun2")));
    }

    #[test]
    fn directory_exists_is_true_for_tmp() {
        assert!(directory_exists(Path::new("/tmp")));
    }
}
