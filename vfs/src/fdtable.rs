use crate::file::RawFile;

/// Installs freshly constructed descriptor objects into a descriptor table.
///
/// The production table is the runtime's; tests and host simulation swap in
/// their own so descriptors can be reached without a runtime.
pub trait FdTable: Send + Sync {
    /// Returns the assigned descriptor number, or a negative value if the
    /// descriptor could not be installed. On success the table (and later
    /// the `close` slot) owns the object.
    fn assign(&self, desc: *mut RawFile) -> i32;
}

#[cfg(feature = "enclave")]
pub use self::runtime::RuntimeFdTable;

#[cfg(feature = "enclave")]
mod runtime {
    use std::os::raw::c_int;

    use super::FdTable;
    use crate::file::RawFile;

    extern "C" {
        fn oe_fdtable_assign(desc: *mut RawFile) -> c_int;
    }

    /// Forwards to the enclave runtime's descriptor table.
    #[derive(Debug, Default)]
    pub struct RuntimeFdTable;

    impl FdTable for RuntimeFdTable {
        fn assign(&self, desc: *mut RawFile) -> i32 {
            unsafe { oe_fdtable_assign(desc) }
        }
    }
}

#[cfg(not(feature = "enclave"))]
pub use self::local::LocalFdTable;

#[cfg(not(feature = "enclave"))]
mod local {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::FdTable;
    use crate::file::RawFile;

    #[derive(Debug, Default)]
    struct Slots {
        next: i32,
        entries: HashMap<i32, usize>,
    }

    /// A process-local descriptor table for host builds.
    ///
    /// Hands out sequential numbers above the standard descriptors and
    /// remembers the objects so callers can reach them again.
    #[derive(Debug)]
    pub struct LocalFdTable(Mutex<Slots>);

    impl LocalFdTable {
        pub fn new() -> Self {
            LocalFdTable(Mutex::new(Slots {
                next: 3,
                entries: HashMap::new(),
            }))
        }

        /// Removes and returns the descriptor object assigned to `fd`.
        /// The caller becomes responsible for closing it.
        pub fn take(&self, fd: i32) -> Option<*mut RawFile> {
            let mut slots = self.0.lock().unwrap();
            slots.entries.remove(&fd).map(|desc| desc as *mut RawFile)
        }
    }

    impl Default for LocalFdTable {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FdTable for LocalFdTable {
        fn assign(&self, desc: *mut RawFile) -> i32 {
            let mut slots = self.0.lock().unwrap();
            let fd = slots.next;
            slots.next += 1;
            slots.entries.insert(fd, desc as usize);
            fd
        }
    }
}
