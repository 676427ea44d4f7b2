//! Linux capability handling for the child process, prior to exec.
//!
//! No crate in this workspace's stack wraps `capset(2)`, the same
//! situation the teacher ran into with seccomp (where it reached for the
//! raw `seccomp-sys` FFI bindings instead of inventing a safe wrapper).
//! This module follows the same pattern: a minimal raw `syscall(2)` call
//! against the kernel's versioned capability ABI, used only to empty the
//! calling process's permitted/effective/inheritable sets.

const _LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Empty the capability set of the calling process and apply it. Returns
/// `Err` on syscall failure; callers in the spawner treat failure here as
/// fatal to child setup (see spec: "any unrecoverable setup failure inside
/// the child aborts the child").
pub fn drop_all() -> std::io::Result<()> {
    let header = CapUserHeader {
        version: _LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    // Two 32-bit capability words (low/high) per the kernel ABI, both
    // zeroed: no permitted, effective or inheritable capabilities.
    let empty_data = [
        CapUserData { effective: 0, permitted: 0, inheritable: 0 },
        CapUserData { effective: 0, permitted: 0, inheritable: 0 },
    ];

    let ret = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &header as *const CapUserHeader,
            empty_data.as_ptr(),
        )
    };

    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
