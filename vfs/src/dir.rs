//! Directory listing synthesized from the store's key namespace.
//!
//! There are no directory objects to back `./` and `./<db>`; listings are
//! derived from the keys of the two column families. All entries share one
//! immutable stat record declaring a directory; consumers that iterate only
//! the names never look at it.

use log::warn;
use once_cell::sync::Lazy;

use crate::file::EnclaveStat;

static DIRECTORY_STAT: Lazy<EnclaveStat> = Lazy::new(|| {
    let mut st = EnclaveStat::zeroed();
    st.st_mode = libc::S_IFDIR | 0o755;
    st
});

/// The stat record shared by every synthesized directory entry.
pub fn directory_stat() -> &'static EnclaveStat {
    &DIRECTORY_STAT
}

/// One entry of a synthesized listing.
#[derive(Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
}

impl DirEntry {
    pub(crate) fn new(name: String) -> Self {
        DirEntry { name }
    }

    pub fn stat(&self) -> &'static EnclaveStat {
        directory_stat()
    }
}

/// Database names from the options family: `./<db>/db.opt` → `<db>`, sorted.
pub(crate) fn database_names(keys: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = keys
        .into_iter()
        .filter_map(|key| {
            match key
                .strip_prefix("./")
                .and_then(|k| k.strip_suffix("/db.opt"))
            {
                Some(name) => Some(name.to_string()),
                None => {
                    warn!("ignoring malformed options key: {}", key);
                    None
                }
            }
        })
        .collect();
    names.sort();
    names
}

/// Schema-file basenames from the schema family: strip everything up to and
/// including the last `/`, sorted.
pub(crate) fn schema_basenames(keys: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = keys
        .into_iter()
        .map(|key| match key.rfind('/') {
            Some(i) => key[i + 1..].to_string(),
            None => key,
        })
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn database_names_strip_prefix_and_suffix() {
        let names = database_names(owned(&["./mydb/db.opt", "./adb/db.opt"]));
        assert_eq!(names, vec!["adb", "mydb"]);
        for name in &names {
            assert!(!name.contains('/') && !name.contains('.'));
        }
    }

    #[test]
    fn malformed_options_keys_are_skipped() {
        let names = database_names(owned(&["./mydb/db.opt", "garbage", "./x/other.opt"]));
        assert_eq!(names, vec!["mydb"]);
    }

    #[test]
    fn schema_basenames_keep_only_the_final_component() {
        let names = schema_basenames(owned(&["./mydb/foo.frm", "./mydb/bar.frm"]));
        assert_eq!(names, vec!["bar.frm", "foo.frm"]);
        for name in &names {
            assert!(!name.contains('/'));
        }
    }

    #[test]
    fn entries_share_the_directory_stat() {
        let a = DirEntry::new("a".to_string());
        let b = DirEntry::new("b".to_string());
        assert!(std::ptr::eq(a.stat(), b.stat()));
        assert_eq!(a.stat().st_mode & libc::S_IFMT, libc::S_IFDIR);
    }
}
