//! Virtual files masquerading as open descriptors.
//!
//! The runtime dispatches descriptor operations through a per-descriptor
//! table of C function pointers installed at `open` time. [`RawFile`] is that
//! descriptor object: the type tag and operation table the runtime expects,
//! followed by the Rust state. The trampolines translate between the C slots
//! and [`FileOps`], catching panics and turning errors into errno returns so
//! nothing ever unwinds into the runtime.

use std::os::raw::{c_int, c_ulong, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Mutex;

use log::error;

use crate::error::{set_errno, Result, VfsError};
use crate::fdtable::FdTable;
use crate::handler::SyscallHandler;
use crate::path::ColumnFamily;

/// The runtime's stat layout, which is smaller than the host's.
///
/// Size is a build-time contract with the runtime; if its layout changes,
/// this struct must track it.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EnclaveStat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_nlink: u64,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    __pad0: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atime: i64,
    pub st_atime_nsec: i64,
    pub st_mtime: i64,
    pub st_mtime_nsec: i64,
    pub st_ctime: i64,
    pub st_ctime_nsec: i64,
}

pub const ENCLAVE_STAT_SIZE: usize = 120;
const _: [(); ENCLAVE_STAT_SIZE] = [(); std::mem::size_of::<EnclaveStat>()];

impl EnclaveStat {
    pub fn zeroed() -> Self {
        // All-integer struct; the all-zero bit pattern is valid.
        unsafe { std::mem::zeroed() }
    }
}

/// Operations on a redirected descriptor.
///
/// Read, write, seek, stat and the sync pair are served from the store. The
/// remaining slots exist so the dispatch table is fully populated, but a
/// store-backed file cannot support them and they fail with `ENOSYS`.
pub trait FileOps: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, buf: &[u8]) -> Result<usize>;
    fn lseek(&self, offset: i64, whence: c_int) -> Result<i64>;
    fn fstat(&self, st: &mut EnclaveStat) -> Result<()>;

    fn fsync(&self) -> Result<()> {
        Ok(())
    }

    fn fdatasync(&self) -> Result<()> {
        self.fsync()
    }

    fn dup(&self) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    fn ioctl(&self, _request: u64, _arg: u64) -> Result<i32> {
        Err(VfsError::NotSupported)
    }

    fn fcntl(&self, _cmd: i32, _arg: u64) -> Result<i32> {
        Err(VfsError::NotSupported)
    }

    fn pread(&self, _buf: &mut [u8], _offset: i64) -> Result<usize> {
        Err(VfsError::NotSupported)
    }

    fn pwrite(&self, _buf: &[u8], _offset: i64) -> Result<usize> {
        Err(VfsError::NotSupported)
    }

    fn getdents64(&self, _dirp: &mut [u8]) -> Result<usize> {
        Err(VfsError::NotSupported)
    }

    fn ftruncate(&self, _length: i64) -> Result<()> {
        Err(VfsError::NotSupported)
    }

    fn get_host_fd(&self) -> Result<i64> {
        Err(VfsError::NotSupported)
    }
}

/// A descriptor whose contents live in the store.
///
/// Owns the canonical path, the routed column family and the current byte
/// offset. The mutex serializes all operations on this descriptor; it may be
/// held while the handler takes the store lock, never the other way around.
pub struct VirtualFile {
    handler: SyscallHandler,
    cf: ColumnFamily,
    path: String,
    offset: Mutex<u64>,
}

impl VirtualFile {
    pub(crate) fn new(handler: SyscallHandler, cf: ColumnFamily, path: String) -> Self {
        VirtualFile {
            handler,
            cf,
            path,
            offset: Mutex::new(0),
        }
    }
}

impl FileOps for VirtualFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.offset.lock().unwrap();
        let n = self.handler.read_at(self.cf, &self.path, buf, *offset)?;
        *offset += n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut offset = self.offset.lock().unwrap();
        self.handler.write_at(self.cf, &self.path, buf, *offset)?;
        *offset += buf.len() as u64;
        Ok(buf.len())
    }

    fn lseek(&self, offset: i64, whence: c_int) -> Result<i64> {
        let mut cur = self.offset.lock().unwrap();
        let base = match whence {
            libc::SEEK_SET => 0,
            libc::SEEK_CUR => *cur as i64,
            libc::SEEK_END => self.handler.size(self.cf, &self.path)? as i64,
            _ => return Err(VfsError::InvalidSeek),
        };
        let pos = match base.checked_add(offset) {
            Some(pos) if pos >= 0 => pos,
            _ => return Err(VfsError::InvalidSeek),
        };
        *cur = pos as u64;
        Ok(pos)
    }

    fn fstat(&self, st: &mut EnclaveStat) -> Result<()> {
        let _offset = self.offset.lock().unwrap();
        let size = self.handler.size(self.cf, &self.path)?;
        *st = EnclaveStat::zeroed();
        st.st_size = size as i64;
        Ok(())
    }
}

/// Descriptor type tag, first field of every descriptor object.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FdType {
    None = 0,
    Any = 1,
    File = 2,
}

/// The per-descriptor operation table the runtime dispatches through.
///
/// `readv`, `writev` and `flock` stay unset; the runtime emulates them over
/// the plain read/write slots. Every other slot must be populated so the
/// runtime never dereferences a null entry.
#[repr(C)]
pub struct FileOpsTable {
    pub read: Option<unsafe extern "C" fn(*mut RawFile, *mut c_void, usize) -> isize>,
    pub write: Option<unsafe extern "C" fn(*mut RawFile, *const c_void, usize) -> isize>,
    pub readv: Option<unsafe extern "C" fn(*mut RawFile, *const c_void, c_int) -> isize>,
    pub writev: Option<unsafe extern "C" fn(*mut RawFile, *const c_void, c_int) -> isize>,
    pub flock: Option<unsafe extern "C" fn(*mut RawFile, c_int) -> c_int>,
    pub dup: Option<unsafe extern "C" fn(*mut RawFile, *mut *mut RawFile) -> c_int>,
    pub ioctl: Option<unsafe extern "C" fn(*mut RawFile, c_ulong, u64) -> c_int>,
    pub fcntl: Option<unsafe extern "C" fn(*mut RawFile, c_int, u64) -> c_int>,
    pub close: Option<unsafe extern "C" fn(*mut RawFile) -> c_int>,
    pub get_host_fd: Option<unsafe extern "C" fn(*mut RawFile) -> i64>,
    pub lseek: Option<unsafe extern "C" fn(*mut RawFile, i64, c_int) -> i64>,
    pub pread: Option<unsafe extern "C" fn(*mut RawFile, *mut c_void, usize, i64) -> isize>,
    pub pwrite: Option<unsafe extern "C" fn(*mut RawFile, *const c_void, usize, i64) -> isize>,
    pub getdents64: Option<unsafe extern "C" fn(*mut RawFile, *mut c_void, u32) -> c_int>,
    pub fstat: Option<unsafe extern "C" fn(*mut RawFile, *mut EnclaveStat) -> c_int>,
    pub ftruncate: Option<unsafe extern "C" fn(*mut RawFile, i64) -> c_int>,
    pub fsync: Option<unsafe extern "C" fn(*mut RawFile) -> c_int>,
    pub fdatasync: Option<unsafe extern "C" fn(*mut RawFile) -> c_int>,
}

/// A descriptor object as the runtime sees it: type tag, operation table,
/// then the Rust file state the trampolines recover.
#[repr(C)]
pub struct RawFile {
    pub fd_type: FdType,
    pub ops: FileOpsTable,
    file: VirtualFile,
}

fn guarded<T: From<i8>>(op: &str, f: impl FnOnce() -> Result<T>) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            if !e.is_expected() {
                error!("{}: {}", op, e);
            }
            set_errno(e.errno());
            T::from(-1)
        }
        Err(_) => {
            error!("{}: unexpected panic", op);
            set_errno(libc::EIO);
            T::from(-1)
        }
    }
}

unsafe extern "C" fn file_read(desc: *mut RawFile, buf: *mut c_void, count: usize) -> isize {
    let file = &(*desc).file;
    let buf = slice::from_raw_parts_mut(buf as *mut u8, count);
    guarded("file_read", || file.read(buf).map(|n| n as isize))
}

unsafe extern "C" fn file_write(desc: *mut RawFile, buf: *const c_void, count: usize) -> isize {
    let file = &(*desc).file;
    let buf = slice::from_raw_parts(buf as *const u8, count);
    guarded("file_write", || file.write(buf).map(|n| n as isize))
}

unsafe extern "C" fn file_dup(desc: *mut RawFile, _new_desc: *mut *mut RawFile) -> c_int {
    let file = &(*desc).file;
    guarded("file_dup", || file.dup().map(|_| 0))
}

unsafe extern "C" fn file_ioctl(desc: *mut RawFile, request: c_ulong, arg: u64) -> c_int {
    let file = &(*desc).file;
    guarded("file_ioctl", || file.ioctl(request as u64, arg))
}

unsafe extern "C" fn file_fcntl(desc: *mut RawFile, cmd: c_int, arg: u64) -> c_int {
    let file = &(*desc).file;
    guarded("file_fcntl", || file.fcntl(cmd, arg))
}

unsafe extern "C" fn file_close(desc: *mut RawFile) -> c_int {
    drop(Box::from_raw(desc));
    0
}

unsafe extern "C" fn file_get_host_fd(desc: *mut RawFile) -> i64 {
    let file = &(*desc).file;
    guarded("file_get_host_fd", || file.get_host_fd())
}

unsafe extern "C" fn file_lseek(desc: *mut RawFile, offset: i64, whence: c_int) -> i64 {
    let file = &(*desc).file;
    guarded("file_lseek", || file.lseek(offset, whence))
}

unsafe extern "C" fn file_pread(
    desc: *mut RawFile,
    buf: *mut c_void,
    count: usize,
    offset: i64,
) -> isize {
    let file = &(*desc).file;
    let buf = slice::from_raw_parts_mut(buf as *mut u8, count);
    guarded("file_pread", || file.pread(buf, offset).map(|n| n as isize))
}

unsafe extern "C" fn file_pwrite(
    desc: *mut RawFile,
    buf: *const c_void,
    count: usize,
    offset: i64,
) -> isize {
    let file = &(*desc).file;
    let buf = slice::from_raw_parts(buf as *const u8, count);
    guarded("file_pwrite", || file.pwrite(buf, offset).map(|n| n as isize))
}

unsafe extern "C" fn file_getdents64(desc: *mut RawFile, dirp: *mut c_void, count: u32) -> c_int {
    let file = &(*desc).file;
    let dirp = slice::from_raw_parts_mut(dirp as *mut u8, count as usize);
    guarded("file_getdents64", || {
        file.getdents64(dirp).map(|n| n as c_int)
    })
}

unsafe extern "C" fn file_fstat(desc: *mut RawFile, buf: *mut EnclaveStat) -> c_int {
    let file = &(*desc).file;
    guarded("file_fstat", || file.fstat(&mut *buf).map(|_| 0))
}

unsafe extern "C" fn file_ftruncate(desc: *mut RawFile, length: i64) -> c_int {
    let file = &(*desc).file;
    guarded("file_ftruncate", || file.ftruncate(length).map(|_| 0))
}

unsafe extern "C" fn file_fsync(desc: *mut RawFile) -> c_int {
    let file = &(*desc).file;
    guarded("file_fsync", || file.fsync().map(|_| 0))
}

unsafe extern "C" fn file_fdatasync(desc: *mut RawFile) -> c_int {
    let file = &(*desc).file;
    guarded("file_fdatasync", || file.fdatasync().map(|_| 0))
}

const FILE_OPS: FileOpsTable = FileOpsTable {
    read: Some(file_read),
    write: Some(file_write),
    readv: None,
    writev: None,
    flock: None,
    dup: Some(file_dup),
    ioctl: Some(file_ioctl),
    fcntl: Some(file_fcntl),
    close: Some(file_close),
    get_host_fd: Some(file_get_host_fd),
    lseek: Some(file_lseek),
    pread: Some(file_pread),
    pwrite: Some(file_pwrite),
    getdents64: Some(file_getdents64),
    fstat: Some(file_fstat),
    ftruncate: Some(file_ftruncate),
    fsync: Some(file_fsync),
    fdatasync: Some(file_fdatasync),
};

/// Boxes a new descriptor object and hands it to the fd table.
///
/// Ownership passes to the runtime on success; the `close` slot reclaims it.
/// On assignment failure the object is reclaimed here and `-1` returned.
pub(crate) fn install(file: VirtualFile, fdtable: &dyn FdTable) -> i32 {
    let desc = Box::into_raw(Box::new(RawFile {
        fd_type: FdType::File,
        ops: FILE_OPS,
        file,
    }));
    let fd = fdtable.assign(desc);
    if fd < 0 {
        drop(unsafe { Box::from_raw(desc) });
        return -1;
    }
    fd
}
