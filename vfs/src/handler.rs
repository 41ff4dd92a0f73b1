//! The syscall handler: decides which filesystem calls are ours and serves
//! them from the store.
//!
//! The server would usually write many kinds of files into its data
//! directory. That directory is an in-memory filesystem here, except for the
//! storage engine's own encrypted files. Table schema files and database
//! option files still need to be persistent, so access to them is
//! intercepted and they are kept in the engine's store instead.

use std::convert::TryFrom;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_long};
use std::sync::{Arc, Mutex};

use edb_store::Store;
use log::error;

use crate::dir::{self, DirEntry};
use crate::error::{set_errno, Result, VfsError};
use crate::fdtable::FdTable;
use crate::file::{self, EnclaveStat, VirtualFile};
use crate::path::{classify, normalize, ColumnFamily, PathClass};

struct Inner {
    store: Arc<dyn Store>,
    fdtable: Arc<dyn FdTable>,
    // Serializes every store access made through the handler. This is what
    // makes write's read-modify-write and rename's get-put-delete atomic.
    store_lock: Mutex<()>,
}

/// Process-wide dispatcher for the redirected filesystem calls.
///
/// Cheap to clone; every open descriptor holds a clone so it can reach the
/// store for the lifetime of the descriptor.
#[derive(Clone)]
pub struct SyscallHandler {
    inner: Arc<Inner>,
}

// The pointer arguments arrive as raw longs from the syscall ABI.
unsafe fn path_arg<'a>(arg: c_long) -> Option<&'a str> {
    if arg == 0 {
        return None;
    }
    // Anything that is not UTF-8 cannot match the grammar, so it is not ours.
    CStr::from_ptr(arg as *const c_char).to_str().ok()
}

impl SyscallHandler {
    pub fn new(store: Arc<dyn Store>, fdtable: Arc<dyn FdTable>) -> Self {
        SyscallHandler {
            inner: Arc::new(Inner {
                store,
                fdtable,
                store_lock: Mutex::new(()),
            }),
        }
    }

    /// Dispatches a raw syscall.
    ///
    /// Returns `Ok(None)` if the call is not ours and must fall through to
    /// the default path, `Ok(Some(value))` if handled (with errno set when
    /// the value is -1), and `Err` for failures the boundary maps to EIO.
    ///
    /// # Safety
    ///
    /// For the handled syscall numbers, `x1` (and `x2` for rename) must be
    /// valid NUL-terminated strings, and `x2` must point to a writable stat
    /// buffer for stat, as the kernel ABI demands.
    pub unsafe fn syscall(&self, number: c_long, x1: c_long, x2: c_long) -> Result<Option<i64>> {
        let res = match number {
            libc::SYS_open => match path_arg(x1) {
                Some(path) => self.open(path, x2 as c_int),
                None => Ok(None),
            },
            libc::SYS_access => match path_arg(x1) {
                Some(path) => self.access(path),
                None => Ok(None),
            },
            libc::SYS_unlink => match path_arg(x1) {
                Some(path) => self.unlink(path),
                None => Ok(None),
            },
            libc::SYS_stat => match path_arg(x1) {
                Some(path) if x2 != 0 => self.stat(path, x2 as *mut EnclaveStat),
                _ => Ok(None),
            },
            libc::SYS_rename => match (path_arg(x1), path_arg(x2)) {
                (Some(old), Some(new)) => self.rename(old, new),
                _ => Ok(None),
            },
            _ => Ok(None),
        };

        match res {
            Err(VfsError::NotFound) => {
                set_errno(libc::ENOENT);
                Ok(Some(-1))
            }
            other => other,
        }
    }

    fn open(&self, path: &str, flags: c_int) -> Result<Option<i64>> {
        match classify(&normalize(path))? {
            PathClass::File { cf, path } => {
                if flags & libc::O_CREAT == 0 && !self.exists(cf, &path)? {
                    return Err(VfsError::NotFound);
                }
                // The backing key materializes on first write, not here.
                let f = VirtualFile::new(self.clone(), cf, path);
                Ok(Some(file::install(f, &*self.inner.fdtable) as i64))
            }
            _ => Ok(None),
        }
    }

    fn access(&self, path: &str) -> Result<Option<i64>> {
        match classify(&normalize(path))? {
            PathClass::File { cf, path } => {
                if self.exists(cf, &path)? {
                    Ok(Some(0))
                } else {
                    Err(VfsError::NotFound)
                }
            }
            PathClass::Folder { path } => {
                // A database folder exists iff its options file does. If it
                // does not, fall through unhandled: a real folder of that
                // name might exist on another mount.
                let key = format!("{}/db.opt", path);
                if self.exists(ColumnFamily::Db, &key)? {
                    Ok(Some(0))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn unlink(&self, path: &str) -> Result<Option<i64>> {
        match classify(&normalize(path))? {
            PathClass::File { cf, path } => {
                let _guard = self.inner.store_lock.lock().unwrap();
                self.inner.store.delete(cf.name(), &path)?;
                Ok(Some(0))
            }
            _ => Ok(None),
        }
    }

    unsafe fn stat(&self, path: &str, buf: *mut EnclaveStat) -> Result<Option<i64>> {
        match classify(&normalize(path))? {
            PathClass::File { cf, path } => match self.fetch(cf, &path)? {
                Some(value) => {
                    let mut st = EnclaveStat::zeroed();
                    st.st_size = value.len() as i64;
                    *buf = st;
                    Ok(Some(0))
                }
                None => Err(VfsError::NotFound),
            },
            PathClass::Folder { path } => {
                let key = format!("{}/db.opt", path);
                if self.exists(ColumnFamily::Db, &key)? {
                    *buf = *dir::directory_stat();
                    Ok(Some(0))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<Option<i64>> {
        let old = classify(&normalize(old))?;
        let new = classify(&normalize(new))?;
        match (old, new) {
            (
                PathClass::File {
                    cf: old_cf,
                    path: old_path,
                },
                PathClass::File {
                    cf: new_cf,
                    path: new_path,
                },
            ) => {
                if old_cf != new_cf {
                    return Err(VfsError::UnexpectedPath(format!(
                        "rename across column families: {} -> {}",
                        old_path, new_path
                    )));
                }
                let _guard = self.inner.store_lock.lock().unwrap();
                let store = &self.inner.store;
                let value = store
                    .get(old_cf.name(), &old_path)?
                    .ok_or(VfsError::NotFound)?;
                store.put(new_cf.name(), &new_path, &value)?;
                store.delete(old_cf.name(), &old_path)?;
                Ok(Some(0))
            }
            _ => Ok(None),
        }
    }

    fn fetch(&self, cf: ColumnFamily, path: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.inner.store_lock.lock().unwrap();
        Ok(self.inner.store.get(cf.name(), path)?)
    }

    fn exists(&self, cf: ColumnFamily, path: &str) -> Result<bool> {
        Ok(self.fetch(cf, path)?.is_some())
    }

    /// Reads from the stored value into `buf`, starting at `offset`.
    /// Called for open descriptors backed by the store.
    pub fn read_at(
        &self,
        cf: ColumnFamily,
        path: &str,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        let value = self
            .fetch(cf, path)?
            .ok_or_else(|| VfsError::NoBacking(path.to_string()))?;
        if value.len() as u64 <= offset {
            return Ok(0);
        }
        let offset = offset as usize;
        let n = buf.len().min(value.len() - offset);
        buf[..n].copy_from_slice(&value[offset..offset + n]);
        Ok(n)
    }

    /// Overwrites the stored value at `offset` with `data`, zero-extending
    /// the value if it is shorter than the write requires.
    pub fn write_at(&self, cf: ColumnFamily, path: &str, data: &[u8], offset: u64) -> Result<()> {
        let required = offset
            .checked_add(data.len() as u64)
            .and_then(|r| usize::try_from(r).ok())
            .ok_or(VfsError::OffsetOverflow)?;

        let _guard = self.inner.store_lock.lock().unwrap();
        let store = &self.inner.store;
        let mut value = store.get(cf.name(), path)?.unwrap_or_default();
        if value.len() < required {
            value.resize(required, 0);
        }
        let offset = offset as usize;
        value[offset..offset + data.len()].copy_from_slice(data);
        store.put(cf.name(), path, &value)?;
        Ok(())
    }

    /// Length of the stored value backing an open descriptor.
    pub fn size(&self, cf: ColumnFamily, path: &str) -> Result<u64> {
        let value = self
            .fetch(cf, path)?
            .ok_or_else(|| VfsError::NoBacking(path.to_string()))?;
        Ok(value.len() as u64)
    }

    /// Lists the virtual namespace: database names below the data root,
    /// schema-file basenames below a database folder. Sorted.
    pub fn dir(&self, path: &str) -> Result<Vec<String>> {
        match classify(&normalize(path))? {
            PathClass::Root => {
                let keys = {
                    let _guard = self.inner.store_lock.lock().unwrap();
                    self.inner.store.get_keys(ColumnFamily::Db.name(), "./")?
                };
                Ok(dir::database_names(keys))
            }
            PathClass::Folder { path } => {
                let prefix = format!("{}/", path);
                let keys = {
                    let _guard = self.inner.store_lock.lock().unwrap();
                    self.inner.store.get_keys(ColumnFamily::Frm.name(), &prefix)?
                };
                Ok(dir::schema_basenames(keys))
            }
            _ => Err(VfsError::UnexpectedPath(path.to_string())),
        }
    }

    /// Consumer-facing listing: never fails, logs and returns empty instead.
    pub fn read_dir(&self, path: &str) -> Vec<DirEntry> {
        match self.dir(path) {
            Ok(names) => names.into_iter().map(DirEntry::new).collect(),
            Err(e) => {
                error!("dir {}: {}", path, e);
                Vec::new()
            }
        }
    }
}
