//! The hook the enclave runtime invokes before dispatching a syscall to its
//! default path, plus the process-wide handler behind it.
//!
//! The hook has a C signature and nowhere to carry state, so the handler is
//! a lazily-built singleton that lives for the enclave's lifetime. Nothing
//! may unwind across this boundary.

use std::os::raw::c_long;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::error;
use once_cell::sync::Lazy;

use crate::error::set_errno;
use crate::handler::SyscallHandler;

/// Result of a hook invocation, as the runtime understands it.
///
/// The discriminants are a build-time contract with the runtime's result
/// codes: `Ok` means the call was handled (result or errno delivered),
/// `Unexpected` tells the runtime to continue on its default path.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookStatus {
    Ok = 0,
    Unexpected = 1,
}

#[cfg(feature = "enclave")]
fn build_handler() -> SyscallHandler {
    SyscallHandler::new(
        Arc::new(edb_store::EngineStore::new()),
        Arc::new(crate::fdtable::RuntimeFdTable),
    )
}

#[cfg(not(feature = "enclave"))]
fn build_handler() -> SyscallHandler {
    SyscallHandler::new(Arc::new(edb_store::MemoryStore::new()), sim_fdtable())
}

/// The descriptor table host builds assign from, reachable so callers can
/// fetch descriptors back out by number.
#[cfg(not(feature = "enclave"))]
pub fn sim_fdtable() -> Arc<crate::fdtable::LocalFdTable> {
    static SIM_FDTABLE: Lazy<Arc<crate::fdtable::LocalFdTable>> =
        Lazy::new(|| Arc::new(crate::fdtable::LocalFdTable::new()));
    SIM_FDTABLE.clone()
}

static HANDLER: Lazy<SyscallHandler> = Lazy::new(|| {
    let _ = env_logger::try_init();
    build_handler()
});

/// The process-wide handler, constructed on first use and never destroyed.
pub fn handler() -> &'static SyscallHandler {
    &HANDLER
}

/// Entry point registered with the enclave runtime.
///
/// Writes the result into `*ret` and returns [`HookStatus::Ok`] when the
/// call was handled; on handled failure `*ret` is -1 and errno is set.
/// [`HookStatus::Unexpected`] sends the runtime down its default path.
#[no_mangle]
pub unsafe extern "C" fn edgeless_syscall_hook(
    number: c_long,
    x1: c_long,
    x2: c_long,
    _x3: c_long,
    _x4: c_long,
    _x5: c_long,
    _x6: c_long,
    ret: *mut c_long,
) -> HookStatus {
    if ret.is_null() {
        return HookStatus::Unexpected;
    }

    match panic::catch_unwind(AssertUnwindSafe(|| HANDLER.syscall(number, x1, x2))) {
        Ok(Ok(Some(value))) => {
            *ret = value as c_long;
            HookStatus::Ok
        }
        Ok(Ok(None)) => HookStatus::Unexpected,
        Ok(Err(e)) => {
            error!("syscall_hook {}: {}", number, e);
            set_errno(e.errno());
            *ret = -1;
            HookStatus::Ok
        }
        Err(_) => {
            error!("syscall_hook {}: unexpected panic", number);
            set_errno(libc::EIO);
            *ret = -1;
            HookStatus::Ok
        }
    }
}

/// Directory enumeration for the patched server's discovery path: invokes
/// `visit` once per entry with the name and the shared directory stat.
#[cfg(feature = "enclave")]
#[no_mangle]
pub unsafe extern "C" fn edgeless_dir(
    path: *const std::os::raw::c_char,
    visit: unsafe extern "C" fn(
        name: *const std::os::raw::c_char,
        st: *const crate::file::EnclaveStat,
        arg: *mut std::os::raw::c_void,
    ),
    arg: *mut std::os::raw::c_void,
) {
    use std::ffi::{CStr, CString};

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let path = match CStr::from_ptr(path).to_str() {
            Ok(p) => p,
            Err(_) => return,
        };
        for entry in HANDLER.read_dir(path) {
            let name = match CString::new(entry.name.clone()) {
                Ok(n) => n,
                Err(_) => continue,
            };
            visit(name.as_ptr(), entry.stat(), arg);
        }
    }));
    if result.is_err() {
        error!("edgeless_dir: unexpected panic");
    }
}

#[cfg(all(test, not(feature = "enclave")))]
mod tests {
    use std::ffi::CString;
    use std::os::raw::c_long;

    use super::*;

    fn errno() -> i32 {
        unsafe { *libc::__errno_location() }
    }

    fn hook(number: c_long, x1: c_long, x2: c_long) -> (HookStatus, c_long) {
        let mut ret: c_long = 0;
        let status =
            unsafe { edgeless_syscall_hook(number, x1, x2, 0, 0, 0, 0, &mut ret) };
        (status, ret)
    }

    fn hook_path(number: c_long, path: &str, x2: c_long) -> (HookStatus, c_long) {
        let path = CString::new(path).unwrap();
        hook(number, path.as_ptr() as c_long, x2)
    }

    #[test]
    fn unknown_syscall_numbers_are_unexpected() {
        let (status, _) = hook(libc::SYS_getpid, 0, 0);
        assert_eq!(status, HookStatus::Unexpected);
    }

    #[test]
    fn foreign_paths_are_unexpected() {
        let (status, _) = hook_path(libc::SYS_access, "/etc/passwd", 0);
        assert_eq!(status, HookStatus::Unexpected);
    }

    #[test]
    fn access_of_a_missing_file_sets_enoent() {
        unsafe { *libc::__errno_location() = 0 };
        let (status, ret) = hook_path(libc::SYS_access, "./hookless/db.opt", 0);
        assert_eq!(status, HookStatus::Ok);
        assert_eq!(ret, -1);
        assert_eq!(errno(), libc::ENOENT);
    }

    #[test]
    fn a_file_survives_the_full_hook_round_trip() {
        let path = "./hookdb/db.opt";

        let (status, fd) = hook_path(libc::SYS_open, path, libc::O_CREAT as c_long);
        assert_eq!(status, HookStatus::Ok);
        assert!(fd >= 3);
        let desc = sim_fdtable().take(fd as i32).unwrap();
        unsafe {
            let ops = &(*desc).ops;
            let written =
                (ops.write.unwrap())(desc, b"hooked".as_ptr() as *const _, 6);
            assert_eq!(written, 6);
            assert_eq!((ops.close.unwrap())(desc), 0);
        }

        let (status, fd) = hook_path(libc::SYS_open, path, 0);
        assert_eq!(status, HookStatus::Ok);
        let desc = sim_fdtable().take(fd as i32).unwrap();
        let mut buf = [0u8; 6];
        unsafe {
            let ops = &(*desc).ops;
            let read = (ops.read.unwrap())(desc, buf.as_mut_ptr() as *mut _, buf.len());
            assert_eq!(read, 6);
            assert_eq!((ops.close.unwrap())(desc), 0);
        }
        assert_eq!(&buf, b"hooked");
    }

    #[test]
    fn unlink_through_the_hook_removes_the_entry() {
        let path = "./hookgone/db.opt";

        let (status, fd) = hook_path(libc::SYS_open, path, libc::O_CREAT as c_long);
        assert_eq!(status, HookStatus::Ok);
        let desc = sim_fdtable().take(fd as i32).unwrap();
        unsafe {
            let ops = &(*desc).ops;
            assert_eq!((ops.write.unwrap())(desc, b"x".as_ptr() as *const _, 1), 1);
            assert_eq!((ops.close.unwrap())(desc), 0);
        }

        let (status, ret) = hook_path(libc::SYS_unlink, path, 0);
        assert_eq!((status, ret), (HookStatus::Ok, 0));

        unsafe { *libc::__errno_location() = 0 };
        let (status, ret) = hook_path(libc::SYS_access, path, 0);
        assert_eq!((status, ret), (HookStatus::Ok, -1));
        assert_eq!(errno(), libc::ENOENT);
    }
}
