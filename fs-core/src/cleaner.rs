//! Cleaner (C7, spec.md §4.7) — the eviction half of the background cron
//! work. Grounded in `original_source/watcher/cleaner.go`: walk the backend,
//! and for every regular file whose `atime` is older than
//! `CleanupOlderThan` hours *and* whose sidecar still exists, remove the
//! data file. The sidecar is authoritative; local data is cache, so the
//! sidecar is left behind for the next populate to re-fetch.

use crate::error::FsResult;
use crate::meta::MetaStore;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Walks `backend_root`, evicting every regular data file whose atime is
/// older than `older_than` and which still has a sidecar. Files without a
/// sidecar (pure local files, never yet pushed) are left untouched — spec.md
/// §3 Invariant 2. Returns the number of files evicted.
pub fn run_once(
    meta_store: &dyn MetaStore,
    backend_root: &Path,
    older_than: Duration,
) -> FsResult<usize> {
    let mut evicted = 0;
    walk(meta_store, backend_root, older_than, &mut evicted)?;
    Ok(evicted)
}

fn walk(
    meta_store: &dyn MetaStore,
    dir: &Path,
    older_than: Duration,
    evicted: &mut usize,
) -> FsResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk(meta_store, &path, older_than, evicted)?;
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) == Some("meta") {
            continue;
        }

        if meta_store.get(&path)?.is_none() {
            continue;
        }

        if is_stale(&path, older_than) {
            if std::fs::remove_file(&path).is_ok() {
                *evicted += 1;
            }
        }
    }
    Ok(())
}

fn is_stale(path: &Path, older_than: Duration) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let atime = match metadata.accessed() {
        Ok(t) => t,
        Err(_) => return false,
    };
    match SystemTime::now().duration_since(atime) {
        Ok(age) => age > older_than,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Entry, FileKind};
    use crate::meta::tree::TreeMetaStore;
    use crate::meta::MetaData;
    use filetime::FileTime;

    fn entry(path: &str) -> Entry {
        Entry {
            path: path.into(),
            hash: "h".into(),
            size: 3,
            uname: "root".into(),
            gname: "root".into(),
            perms: 0o644,
            filetype: FileKind::Regular,
            ctime: 0,
            mtime: 0,
            extended: String::new(),
            dev_major: 0,
            dev_minor: 0,
        }
    }

    #[test]
    fn evicts_stale_file_but_keeps_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("x");
        std::fs::write(&data_path, b"abc").unwrap();

        let meta_store = TreeMetaStore::new();
        meta_store
            .save(&data_path, &MetaData::from_entry(&entry("/x")))
            .unwrap();

        let two_hours_ago = FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(2 * 3600),
        );
        filetime::set_file_atime(&data_path, two_hours_ago).unwrap();

        let evicted = run_once(&meta_store, dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(evicted, 1);
        assert!(!data_path.exists());
        assert!(meta_store.get(&data_path).unwrap().is_some());
    }

    #[test]
    fn leaves_fresh_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("y");
        std::fs::write(&data_path, b"abc").unwrap();

        let meta_store = TreeMetaStore::new();
        meta_store
            .save(&data_path, &MetaData::from_entry(&entry("/y")))
            .unwrap();

        let evicted = run_once(&meta_store, dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(evicted, 0);
        assert!(data_path.exists());
    }

    #[test]
    fn skips_files_without_a_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("z");
        std::fs::write(&data_path, b"abc").unwrap();
        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(2 * 3600));
        filetime::set_file_atime(&data_path, old).unwrap();

        let meta_store = TreeMetaStore::new();
        let evicted = run_once(&meta_store, dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(evicted, 0);
        assert!(data_path.exists());
    }
}
