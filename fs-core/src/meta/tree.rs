//! In-memory branch/leaf meta store — spec.md §4.5: "parses the entire
//! manifest at mount time, holds nodes in a branch/leaf tree, and writes
//! sidecars lazily." Grounded in
//! `original_source/metadata/{memimpl,branch,leaf}.go`, generalized from
//! Go's `Node` interface to a single `RwLock<HashMap<PathBuf, MetaData>>`
//! index — the tree shape there exists to support prefix search, which a
//! `PathBuf`-keyed map gives for free without an explicit branch/leaf type.

use super::{sidecar_path, MetaData, MetaState, MetaStore};
use crate::error::{FsError, FsResult};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Readers (`get`/`stat`/`children`) take a shared lock; writers
/// (`save`/`set_stat`/`delete`/`purge`) take an exclusive one — spec.md §5's
/// "in-memory variant protected by a reader-writer lock."
pub struct TreeMetaStore {
    index: RwLock<HashMap<PathBuf, MetaData>>,
}

impl TreeMetaStore {
    pub fn new() -> Self {
        TreeMetaStore {
            index: RwLock::new(HashMap::new()),
        }
    }

    fn write_sidecar_file(path: &Path, data: &MetaData) -> FsResult<()> {
        let sidecar = sidecar_path(path);
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string(data).map_err(|e| FsError::BadMeta {
            path: sidecar.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&sidecar, body)?;

        let perms = std::fs::Permissions::from_mode(data.state.bits() | 0o600);
        std::fs::set_permissions(&sidecar, perms)?;
        Ok(())
    }
}

impl Default for TreeMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaStore for TreeMetaStore {
    fn get(&self, path: &Path) -> FsResult<Option<MetaData>> {
        let idx = self.index.read().unwrap();
        Ok(idx.get(path).cloned())
    }

    fn save(&self, path: &Path, data: &MetaData) -> FsResult<()> {
        Self::write_sidecar_file(path, data)?;
        let mut idx = self.index.write().unwrap();
        idx.insert(path.to_path_buf(), data.clone());
        Ok(())
    }

    fn stat(&self, path: &Path) -> FsResult<Option<MetaState>> {
        let idx = self.index.read().unwrap();
        Ok(idx.get(path).map(|m| m.state))
    }

    fn set_stat(&self, path: &Path, state: MetaState) -> FsResult<()> {
        let mut idx = self.index.write().unwrap();
        if let Some(m) = idx.get_mut(path) {
            m.state = state;
            let sidecar = sidecar_path(path);
            if sidecar.exists() {
                let perms = std::fs::Permissions::from_mode(state.bits() | 0o600);
                std::fs::set_permissions(&sidecar, perms)?;
            }
        }
        Ok(())
    }

    fn create_file(&self, path: &Path) -> FsResult<()> {
        let mut idx = self.index.write().unwrap();
        if idx.contains_key(path) {
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
        drop(idx);
        Self::write_sidecar_file(path, &md)?;
        let mut idx = self.index.write().unwrap();
        idx.insert(path.to_path_buf(), md);
        Ok(())
    }

    fn delete(&self, path: &Path) -> FsResult<()> {
        let sidecar = sidecar_path(path);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
        let mut idx = self.index.write().unwrap();
        idx.remove(path);
        Ok(())
    }

    fn children(&self, dir: &Path) -> FsResult<Vec<PathBuf>> {
        let idx = self.index.read().unwrap();
        let mut out = Vec::new();
        for p in idx.keys() {
            if p.parent() == Some(dir) {
                out.push(p.clone());
            }
        }
        Ok(out)
    }

    fn purge(&self) -> FsResult<()> {
        let mut idx = self.index.write().unwrap();
        idx.clear();
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
        let store = TreeMetaStore::new();
        let path = dir.path().join("a/b.bin");
        let md = sample_meta();
        store.save(&path, &md).unwrap();
        let got = store.get(&path).unwrap().unwrap();
        assert_eq!(got.hash, md.hash);
        assert!(sidecar_path(&path).exists());
    }

    #[test]
    fn set_stat_updates_sidecar_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeMetaStore::new();
        let path = dir.path().join("x");
        store.save(&path, &sample_meta()).unwrap();
        store.set_stat(&path, MetaState(super::super::STATE_MODIFIED)).unwrap();
        let meta = std::fs::metadata(sidecar_path(&path)).unwrap();
        assert_eq!(meta.permissions().mode() & super::super::STATE_MASK, super::super::STATE_MODIFIED);
    }

    #[test]
    fn delete_removes_sidecar_but_caller_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeMetaStore::new();
        let path = dir.path().join("x");
        std::fs::write(&path, b"data").unwrap();
        store.save(&path, &sample_meta()).unwrap();
        store.delete(&path).unwrap();
        assert!(!sidecar_path(&path).exists());
        assert!(path.exists());
    }

    #[test]
    fn children_one_level() {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeMetaStore::new();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        store.save(&dir.path().join("sub/a"), &sample_meta()).unwrap();
        store.save(&dir.path().join("sub/b"), &sample_meta()).unwrap();
        let kids = store.children(&dir.path().join("sub")).unwrap();
        assert_eq!(kids.len(), 2);
    }
}
