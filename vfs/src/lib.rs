//! Syscall interception and store-backed virtual files for the enclaved
//! database server.
//!
//! The server's data directory lives in an in-memory filesystem, so table
//! schema files (`.frm`) and database option files (`db.opt`) would be lost
//! at restart. This crate intercepts the narrow set of filesystem calls that
//! touch them and serves the files from the storage engine's encrypted
//! key-value store instead: a path classifier decides what is ours, a
//! dispatcher handles open/access/unlink/stat/rename, and per-descriptor
//! virtual files implement read/write/lseek/fstat over the store.

pub mod dir;
pub mod error;
pub mod fdtable;
pub mod file;
pub mod handler;
pub mod hook;
pub mod path;

pub use crate::error::{Result, VfsError};
pub use crate::handler::SyscallHandler;
pub use crate::hook::{handler, HookStatus};
