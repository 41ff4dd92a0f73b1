use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use anyhow::{anyhow, bail, Result};

use crate::Store;

// Store hooks exported by the patched storage engine. The engine owns the one
// transactional key-value instance for the whole database; these wrappers are
// the only way other enclave code may touch it.
extern "C" {
    /// 0 = found (`*value` is engine-allocated, released with `free`),
    /// 1 = not found, negative = engine failure.
    fn edgeless_rdb_get(
        cf: *const c_char,
        key: *const u8,
        key_len: usize,
        value: *mut *mut u8,
        value_len: *mut usize,
    ) -> c_int;

    fn edgeless_rdb_put(
        cf: *const c_char,
        key: *const u8,
        key_len: usize,
        value: *const u8,
        value_len: usize,
    ) -> c_int;

    fn edgeless_rdb_delete(cf: *const c_char, key: *const u8, key_len: usize) -> c_int;

    fn edgeless_rdb_keys(
        cf: *const c_char,
        prefix: *const u8,
        prefix_len: usize,
        visit: unsafe extern "C" fn(key: *const u8, key_len: usize, arg: *mut c_void),
        arg: *mut c_void,
    ) -> c_int;

    fn edgeless_rdb_flush_wal(sync: c_int) -> c_int;
}

/// The production backing: the storage engine's own key-value store.
///
/// The engine disables automatic WAL flushing, so every mutation here flushes
/// manually before returning. That is what makes `put` and `delete` durable.
#[derive(Debug, Default)]
pub struct EngineStore;

impl EngineStore {
    pub fn new() -> Self {
        EngineStore
    }

    fn flush_wal(&self) -> Result<()> {
        let res = unsafe { edgeless_rdb_flush_wal(1) };
        if res != 0 {
            bail!("storage engine: flushing the WAL failed ({})", res);
        }
        Ok(())
    }
}

fn cf_name(column_family: &str) -> Result<CString> {
    CString::new(column_family).map_err(|_| anyhow!("column family name contains a NUL byte"))
}

unsafe extern "C" fn collect_key(key: *const u8, key_len: usize, arg: *mut c_void) {
    let keys = &mut *(arg as *mut Vec<String>);
    let bytes = std::slice::from_raw_parts(key, key_len);
    keys.push(String::from_utf8_lossy(bytes).into_owned());
}

impl Store for EngineStore {
    fn get(&self, column_family: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = cf_name(column_family)?;
        let mut value: *mut u8 = ptr::null_mut();
        let mut value_len = 0usize;
        let res = unsafe {
            edgeless_rdb_get(
                cf.as_ptr(),
                key.as_ptr(),
                key.len(),
                &mut value,
                &mut value_len,
            )
        };
        match res {
            0 => {
                if value.is_null() {
                    return Ok(Some(Vec::new()));
                }
                let out = unsafe { std::slice::from_raw_parts(value, value_len).to_vec() };
                unsafe { libc::free(value as *mut c_void) };
                Ok(Some(out))
            }
            1 => Ok(None),
            _ => bail!("storage engine: get failed ({})", res),
        }
    }

    fn put(&self, column_family: &str, key: &str, value: &[u8]) -> Result<()> {
        let cf = cf_name(column_family)?;
        let res = unsafe {
            edgeless_rdb_put(
                cf.as_ptr(),
                key.as_ptr(),
                key.len(),
                value.as_ptr(),
                value.len(),
            )
        };
        if res != 0 {
            bail!("storage engine: put failed ({})", res);
        }
        self.flush_wal()
    }

    fn delete(&self, column_family: &str, key: &str) -> Result<()> {
        let cf = cf_name(column_family)?;
        let res = unsafe { edgeless_rdb_delete(cf.as_ptr(), key.as_ptr(), key.len()) };
        if res != 0 {
            bail!("storage engine: delete failed ({})", res);
        }
        self.flush_wal()
    }

    fn get_keys(&self, column_family: &str, prefix: &str) -> Result<Vec<String>> {
        let cf = cf_name(column_family)?;
        let mut keys: Vec<String> = Vec::new();
        let res = unsafe {
            edgeless_rdb_keys(
                cf.as_ptr(),
                prefix.as_ptr(),
                prefix.len(),
                collect_key,
                &mut keys as *mut Vec<String> as *mut c_void,
            )
        };
        if res != 0 {
            bail!("storage engine: key scan failed ({})", res);
        }
        Ok(keys)
    }
}
