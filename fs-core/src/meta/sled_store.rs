//! Sled-backed persisted meta store — spec.md §4.5's "Bolt-backed variant
//! persists the tree to a single key-value file with nested buckets per
//! directory." Grounded in `original_source/metadata/boltimpl.go` and
//! `database/boltdb.go`; `sled` is this ecosystem's closest analog to
//! BoltDB, and its `Tree` type is the closest analog to a bucket, so one
//! `sled::Tree` is opened per parent directory.

use super::{sidecar_path, MetaData, MetaState, MetaStore};
use crate::error::{FsError, FsResult};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub struct SledMetaStore {
    db_path: PathBuf,
    db: RwLock<sled::Db>,
}

impl SledMetaStore {
    pub fn open(db_path: impl Into<PathBuf>) -> FsResult<Self> {
        let db_path = db_path.into();
        let db = sled::open(&db_path).map_err(sled_to_fs_err)?;
        Ok(SledMetaStore {
            db_path,
            db: RwLock::new(db),
        })
    }

    fn tree_for_dir(&self, dir: &Path) -> FsResult<sled::Tree> {
        let name = dir.to_string_lossy();
        let db = self.db.read().unwrap();
        db.open_tree(name.as_bytes()).map_err(sled_to_fs_err)
    }

    fn key_for(path: &Path) -> Vec<u8> {
        path.file_name()
            .map(|n| n.as_encoded_bytes().to_vec())
            .unwrap_or_default()
    }
}

fn sled_to_fs_err(e: sled::Error) -> FsError {
    FsError::Io(std::io::Error::other(e))
}

impl MetaStore for SledMetaStore {
    fn get(&self, path: &Path) -> FsResult<Option<MetaData>> {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let tree = self.tree_for_dir(dir)?;
        let key = Self::key_for(path);
        match tree.get(&key).map_err(sled_to_fs_err)? {
            Some(bytes) => {
                let md: MetaData = toml::from_str(std::str::from_utf8(&bytes).map_err(|e| {
                    FsError::BadMeta {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    }
                })?)
                .map_err(|e| FsError::BadMeta {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                Ok(Some(md))
            }
            None => Ok(None),
        }
    }

    fn save(&self, path: &Path, data: &MetaData) -> FsResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let tree = self.tree_for_dir(dir)?;
        let key = Self::key_for(path);
        let body = toml::to_string(data).map_err(|e| FsError::BadMeta {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tree.insert(&key, body.as_bytes()).map_err(sled_to_fs_err)?;
        tree.flush().map_err(sled_to_fs_err)?;

        // The sidecar file on disk carries the load-bearing state bits in
        // its mode, same as the tree variant, so tools operating directly
        // on the backend (not through this store) still see correct state.
        let sidecar = sidecar_path(path);
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&sidecar, &body)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&sidecar, std::fs::Permissions::from_mode(data.state.bits() | 0o600))?;
        Ok(())
    }

    fn stat(&self, path: &Path) -> FsResult<Option<MetaState>> {
        Ok(self.get(path)?.map(|m| m.state))
    }

    fn set_stat(&self, path: &Path, state: MetaState) -> FsResult<()> {
        if let Some(mut md) = self.get(path)? {
            md.state = state;
            self.save(path, &md)?;
        }
        Ok(())
    }

    fn create_file(&self, path: &Path) -> FsResult<()> {
        if self.get(path)?.is_some() {
            return Ok(());
        }
        let md = MetaData {
            hash: String::new(),
            size: 0,
            uname: String::new(),
            uid: 0,
            gname: String::new(),
            gid: 0,
            permissions: 0o644,
            filetype: crate::manifest::FileKind::Regular,
            ctime: 0,
            mtime: 0,
            extended: String::new(),
            dev_major: 0,
            dev_minor: 0,
            user_key: String::new(),
            store_key: String::new(),
            state: MetaState(super::STATE_INITIAL),
        };
        self.save(path, &md)
    }

    fn delete(&self, path: &Path) -> FsResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let tree = self.tree_for_dir(dir)?;
        tree.remove(&Self::key_for(path)).map_err(sled_to_fs_err)?;
        let sidecar = sidecar_path(path);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
        Ok(())
    }

    fn children(&self, dir: &Path) -> FsResult<Vec<PathBuf>> {
        let tree = self.tree_for_dir(dir)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, _) = item.map_err(sled_to_fs_err)?;
            let name = String::from_utf8_lossy(&key).to_string();
            out.push(dir.join(name));
        }
        Ok(out)
    }

    /// Closes, deletes, and reopens the database file — spec.md §4.5:
    /// "at `purge()` it closes, deletes, and reopens the database."
    fn purge(&self) -> FsResult<()> {
        let mut db = self.db.write().unwrap();
        drop(std::mem::replace(&mut *db, sled::Config::new().temporary(true).open().map_err(sled_to_fs_err)?));
        let _ = std::fs::remove_dir_all(&self.db_path);
        *db = sled::open(&self.db_path).map_err(sled_to_fs_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileKind;

    fn sample_meta() -> MetaData {
        MetaData {
            hash: "abc".into(),
            size: 3,
            uname: "root".into(),
            uid: 0,
            gname: "root".into(),
            gid: 0,
            permissions: 0o644,
            filetype: FileKind::Regular,
            ctime: 1,
            mtime: 2,
            extended: String::new(),
            dev_major: 0,
            dev_minor: 0,
            user_key: String::new(),
            store_key: String::new(),
            state: MetaState(super::super::STATE_INITIAL),
        }
    }

    #[test]
    fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetaStore::open(dir.path().join("db")).unwrap();
        let path = PathBuf::from("/mnt/a/b.bin");
        store.save(&path, &sample_meta()).unwrap();
        let got = store.get(&path).unwrap().unwrap();
        assert_eq!(got.hash, "abc");
    }

    #[test]
    fn purge_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMetaStore::open(dir.path().join("db")).unwrap();
        let path = PathBuf::from("/mnt/a");
        store.save(&path, &sample_meta()).unwrap();
        store.purge().unwrap();
        assert!(store.get(&path).unwrap().is_none());
    }
}
