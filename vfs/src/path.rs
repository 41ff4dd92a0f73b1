//! Path grammar of the redirected namespace.
//!
//! The server only ever touches two kinds of metadata files below its data
//! root: `./<db>/db.opt` and `./<db>/<tab>.frm`. The grammar is deliberately
//! that narrow; it doubles as the persisted key format, so any change here
//! changes the on-store layout. Matching is a hand-written character check;
//! the grammar is finite and tiny.

use std::borrow::Cow;

use crate::error::{Result, VfsError};

/// Column family holding the per-database option files (`db.opt`).
pub const CF_NAME_DB: &str = "edg_db_cf";
/// Column family holding the per-table schema files (`.frm`).
pub const CF_NAME_FRM: &str = "edg_frm_cf";

/// The store column family a canonical path routes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnFamily {
    Db,
    Frm,
}

impl ColumnFamily {
    pub fn name(self) -> &'static str {
        match self {
            ColumnFamily::Db => CF_NAME_DB,
            ColumnFamily::Frm => CF_NAME_FRM,
        }
    }
}

/// What a normalized path means to the handler.
#[derive(Debug, PartialEq, Eq)]
pub enum PathClass {
    /// A metadata file we redirect: the canonical key and its column family.
    File { cf: ColumnFamily, path: String },
    /// A database folder, canonicalized without a trailing slash.
    Folder { path: String },
    /// The data root itself.
    Root,
    /// Not ours; the syscall must fall through to the default path.
    Unhandled,
}

/// Rewrites the absolute data-directory prefix to the relative form the
/// canonical keys use. Idempotent.
pub fn normalize(path: &str) -> Cow<'_, str> {
    if path == "/data" || path == "/data/" {
        return Cow::Borrowed(".");
    }
    if let Some(rest) = path.strip_prefix("/data/") {
        return Cow::Owned(format!("./{}", rest));
    }
    Cow::Borrowed(path)
}

// A database or table name: nonempty, no dots, no slashes.
fn is_name(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b != b'.' && b != b'/')
}

fn classify_known_file(path: &str) -> Result<PathClass> {
    let err = || VfsError::UnexpectedPath(path.to_string());

    let rest = path.strip_prefix("./").ok_or_else(err)?;
    let slash = rest.find('/').ok_or_else(err)?;
    let (db, file) = (&rest[..slash], &rest[slash + 1..]);
    if !is_name(db) {
        return Err(err());
    }

    let cf = if file == "db.opt" {
        ColumnFamily::Db
    } else if file.strip_suffix(".frm").map_or(false, is_name) {
        ColumnFamily::Frm
    } else {
        return Err(err());
    };

    Ok(PathClass::File {
        cf,
        path: path.to_string(),
    })
}

/// Classifies a normalized path.
///
/// A path carrying one of the known extensions must match the canonical shape
/// exactly; anything else with such an extension is a programming error in
/// the caller, not a missing file. Paths without a known extension are either
/// a database folder, the data root, or not our problem.
pub fn classify(path: &str) -> Result<PathClass> {
    if path.ends_with(".frm") || path.ends_with(".opt") {
        return classify_known_file(path);
    }

    if let Some(rest) = path.strip_prefix("./") {
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if is_name(rest) {
            return Ok(PathClass::Folder {
                path: format!("./{}", rest),
            });
        }
    }

    if path == "." {
        return Ok(PathClass::Root);
    }

    Ok(PathClass::Unhandled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> PathClass {
        classify(path).unwrap()
    }

    #[test]
    fn frm_routes_to_the_schema_family() {
        match file("./mydb/mytab.frm") {
            PathClass::File { cf, path } => {
                assert_eq!(cf, ColumnFamily::Frm);
                assert_eq!(cf.name(), "edg_frm_cf");
                assert_eq!(path, "./mydb/mytab.frm");
            }
            other => panic!("unexpected class: {:?}", other),
        }
    }

    #[test]
    fn db_opt_routes_to_the_options_family() {
        match file("./mydb/db.opt") {
            PathClass::File { cf, .. } => {
                assert_eq!(cf, ColumnFamily::Db);
                assert_eq!(cf.name(), "edg_db_cf");
            }
            other => panic!("unexpected class: {:?}", other),
        }
    }

    #[test]
    fn unknown_suffixes_are_not_ours() {
        assert_eq!(file("./mydb/foo.bar"), PathClass::Unhandled);
        assert_eq!(file("/etc/passwd"), PathClass::Unhandled);
        assert_eq!(file("./mydb/sub/dir"), PathClass::Unhandled);
        // A trailing slash hides the extension, so this is not a known file
        // and not a folder either.
        assert_eq!(file("./mydb/mytab.frm/"), PathClass::Unhandled);
        assert_eq!(file(""), PathClass::Unhandled);
    }

    #[test]
    fn known_extension_with_bad_shape_is_an_error() {
        // Known extension but not the canonical shape: these must fail loudly
        // instead of silently falling through.
        for p in &[
            "foo.frm",
            "./foo.frm",
            "./my.db/mytab.frm",
            "./mydb/my.tab.frm",
            "./mydb/sub/mytab.frm",
            "./mydb/.frm",
            "./mydb/foo.opt",
            "./mydb/db.opt.opt",
            "/data2/mydb/mytab.frm",
        ] {
            match classify(p) {
                Err(VfsError::UnexpectedPath(_)) => {}
                other => panic!("{}: unexpected result {:?}", p, other),
            }
        }
    }

    #[test]
    fn folders_tolerate_a_trailing_slash() {
        assert_eq!(
            file("./mydb"),
            PathClass::Folder {
                path: "./mydb".to_string()
            }
        );
        assert_eq!(
            file("./mydb/"),
            PathClass::Folder {
                path: "./mydb".to_string()
            }
        );
        assert_eq!(file("./my.db"), PathClass::Unhandled);
        assert_eq!(file("./mydb//"), PathClass::Unhandled);
        assert_eq!(file("./"), PathClass::Unhandled);
    }

    #[test]
    fn the_data_root_is_its_own_class() {
        assert_eq!(file("."), PathClass::Root);
        assert_eq!(file(&normalize("/data/")), PathClass::Root);
        assert_eq!(file(&normalize("/data")), PathClass::Root);
    }

    #[test]
    fn normalize_rewrites_the_data_prefix() {
        assert_eq!(normalize("/data/"), ".");
        assert_eq!(normalize("/data"), ".");
        assert_eq!(normalize("/data/mydb"), "./mydb");
        assert_eq!(normalize("/data/mydb/"), "./mydb/");
        assert_eq!(normalize("/data/mydb/mytab.frm"), "./mydb/mytab.frm");
        assert_eq!(normalize("./mydb"), "./mydb");
        assert_eq!(normalize("/database/x"), "/database/x");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in &[
            "/data/",
            "/data",
            "/data/mydb",
            "/data/mydb/mytab.frm",
            "./mydb/db.opt",
            ".",
            "",
            "/etc/passwd",
            "relative/path",
        ] {
            let once = normalize(p).into_owned();
            let twice = normalize(&once).into_owned();
            assert_eq!(once, twice, "normalize not idempotent for {}", p);
        }
    }
}
