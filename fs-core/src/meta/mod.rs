//! Meta store (C5) — spec.md §3/§4.5.
//!
//! One sidecar per data file, `<path>.meta`, TOML-encoded. State lives in
//! the sidecar's own POSIX mode bits (masked to the owner triad) rather
//! than in a field, so that listing a directory with `stat` alone reveals
//! state without opening the file — a portability concession carried
//! bit-for-bit from `original_source/rw/meta/meta.go`.

pub mod sled_store;
pub mod tree;

use crate::error::FsResult;
use crate::manifest::{Entry, FileKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `0400` — sidecar written, data not yet downloaded.
pub const STATE_INITIAL: u32 = 0o400;
/// `0200` — data file has been locally modified since last upload.
pub const STATE_MODIFIED: u32 = 0o200;
/// `0100` — path tombstoned (overlay unlink/rmdir/rename-away).
pub const STATE_DELETED: u32 = 0o100;
/// No bits set — data materialized, sidecar optional.
pub const STATE_POPULATED: u32 = 0;
/// Mask selecting the state bits out of a full mode.
pub const STATE_MASK: u32 = 0o500;

/// `MetaState` lets callers reason about a sidecar's mode bits without
/// repeating the bit arithmetic at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaState(pub u32);

impl MetaState {
    pub fn from_mode(mode: u32) -> Self {
        MetaState(mode & STATE_MASK)
    }

    pub fn initial(self) -> bool {
        self.0 & STATE_INITIAL != 0
    }

    pub fn modified(self) -> bool {
        self.0 & STATE_MODIFIED != 0
    }

    pub fn deleted(self) -> bool {
        self.0 & STATE_DELETED != 0
    }

    pub fn populated(self) -> bool {
        self.0 == STATE_POPULATED
    }

    pub fn set_modified(&mut self) {
        self.0 |= STATE_MODIFIED;
    }

    pub fn set_deleted(&mut self) {
        self.0 |= STATE_DELETED;
    }

    pub fn clear(&mut self) {
        self.0 = STATE_POPULATED;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// The sidecar record itself — mirrors a manifest `Entry` plus the two
/// hex-encoded, RSA-wrapped AES session keys present on encrypted backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    pub hash: String,
    pub size: u64,
    pub uname: String,
    pub uid: u32,
    pub gname: String,
    pub gid: u32,
    pub permissions: u32,
    pub filetype: FileKind,
    pub ctime: i64,
    pub mtime: i64,
    #[serde(default)]
    pub extended: String,
    #[serde(default)]
    pub dev_major: u32,
    #[serde(default)]
    pub dev_minor: u32,
    #[serde(default)]
    pub user_key: String,
    #[serde(default)]
    pub store_key: String,

    /// Not serialized into the TOML body — callers read/write this via the
    /// sidecar file's own mode bits (`MetaStore::stat`/`set_stat`).
    #[serde(skip)]
    pub state: MetaState,
}

impl MetaData {
    pub fn from_entry(e: &Entry) -> Self {
        MetaData {
            hash: e.hash.clone(),
            size: e.size,
            uname: e.uname.clone(),
            uid: 0,
            gname: e.gname.clone(),
            gid: 0,
            permissions: e.perms,
            filetype: e.filetype,
            ctime: e.ctime,
            mtime: e.mtime,
            extended: e.extended.clone(),
            dev_major: e.dev_major,
            dev_minor: e.dev_minor,
            user_key: String::new(),
            store_key: String::new(),
            state: MetaState(STATE_INITIAL),
        }
    }

    pub fn rdev(&self) -> u32 {
        self.dev_major * 256 + self.dev_minor
    }
}

/// Path of the sidecar file belonging to a data path.
pub fn sidecar_path(data_path: &Path) -> PathBuf {
    let mut s = data_path.as_os_str().to_os_string();
    s.push(".meta");
    PathBuf::from(s)
}

/// Strips the `.meta` suffix, if present, returning the implied data path.
pub fn data_path_of_sidecar(sidecar: &Path) -> Option<PathBuf> {
    let s = sidecar.to_str()?;
    s.strip_suffix(".meta").map(PathBuf::from)
}

/// Uniform sidecar access, independent of whether the index backing it is
/// an in-memory tree or a persisted `sled` database — spec.md §4.5.
pub trait MetaStore: Send + Sync {
    fn get(&self, path: &Path) -> FsResult<Option<MetaData>>;
    fn save(&self, path: &Path, data: &MetaData) -> FsResult<()>;
    fn stat(&self, path: &Path) -> FsResult<Option<MetaState>>;
    fn set_stat(&self, path: &Path, state: MetaState) -> FsResult<()>;
    fn create_file(&self, path: &Path) -> FsResult<()>;
    fn delete(&self, path: &Path) -> FsResult<()>;
    fn children(&self, dir: &Path) -> FsResult<Vec<PathBuf>>;
    fn purge(&self) -> FsResult<()>;
}

/// Loads the uid for a user name, falling back to 0 on any lookup failure —
/// spec.md §4.5's "population from manifest" procedure.
pub fn uid_for_name(name: &str) -> u32 {
    users::get_user_by_name(name).map(|u| u.uid()).unwrap_or(0)
}

/// Loads the gid for a group name, falling back to 0 on any lookup failure.
pub fn gid_for_name(name: &str) -> u32 {
    users::get_group_by_name(name).map(|g| g.gid()).unwrap_or(0)
}

/// Populates `store` from parsed manifest entries, per spec.md §4.5: hash
/// compare-and-evict against any already-downloaded data file, skip
/// sidecars that are `modified` or `deleted`, write the sidecar regardless
/// otherwise.
pub fn populate_from_manifest(
    store: &dyn MetaStore,
    backend_root: &Path,
    entries: &[Entry],
) -> FsResult<()> {
    for e in entries {
        let rel = e.path.trim_start_matches('/');
        let data_path = backend_root.join(rel);

        if let Some(existing) = store.stat(&data_path)? {
            if existing.modified() || existing.deleted() {
                continue;
            }
        }

        let mut md = MetaData::from_entry(e);
        md.uid = uid_for_name(&e.uname);
        md.gid = gid_for_name(&e.gname);

        if data_path.exists() {
            if let Ok(Some(current)) = store.get(&data_path) {
                if current.hash != md.hash {
                    let _ = std::fs::remove_file(&data_path);
                }
            }
        }

        store.save(&data_path, &md)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bits_roundtrip() {
        let mut s = MetaState(STATE_INITIAL);
        assert!(s.initial());
        assert!(!s.populated());
        s.set_modified();
        assert!(s.modified());
        assert_eq!(s.bits(), 0o600);
    }

    #[test]
    fn sidecar_path_suffix() {
        let p = sidecar_path(Path::new("/a/b"));
        assert_eq!(p, PathBuf::from("/a/b.meta"));
        assert_eq!(data_path_of_sidecar(&p), Some(PathBuf::from("/a/b")));
    }

    #[test]
    fn rdev_combines_major_minor() {
        let mut md = MetaData::from_entry(&Entry {
            path: "/dev/x".into(),
            hash: String::new(),
            size: 0,
            uname: String::new(),
            gname: String::new(),
            perms: 0o644,
            filetype: FileKind::Char,
            ctime: 0,
            mtime: 0,
            extended: String::new(),
            dev_major: 1,
            dev_minor: 5,
        });
        md.dev_major = 1;
        md.dev_minor = 5;
        assert_eq!(md.rdev(), 256 + 5);
    }
}
