//! Populate pipeline (C6) — spec.md §4.6.
//!
//! Brings a logical path into physical existence on the backend from its
//! sidecar, walking the path's prefix left-to-right so that every ancestor
//! directory exists before its children are materialized.

use crate::cache::CacheManager;
use crate::config::Backend;
use crate::download::download_file;
use crate::error::{FsError, FsResult};
use crate::manifest::FileKind;
use crate::meta::{MetaState, MetaStore};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A striped mutex keyed by path hash — spec.md §4.6: "a striped mutex
/// keyed by path hash ... suffices" to serialize concurrent populates of
/// the same path without a single global lock.
pub struct PopulateGuard {
    stripes: Vec<Mutex<()>>,
}

const STRIPE_COUNT: usize = 64;

impl PopulateGuard {
    pub fn new() -> Self {
        let mut stripes = Vec::with_capacity(STRIPE_COUNT);
        for _ in 0..STRIPE_COUNT {
            stripes.push(Mutex::new(()));
        }
        PopulateGuard { stripes }
    }

    fn stripe_for(&self, path: &Path) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    /// Holds the stripe for `path` for the duration of `f`.
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let _guard = self.stripe_for(path).lock().unwrap();
        f()
    }
}

impl Default for PopulateGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Brings `target` (a backend-relative logical path, `/`-delimited) into
/// existence, walking every path prefix. Returns `Ok(())` once the full
/// target path exists on the backend (directories, device nodes, symlinks)
/// or has been handed to the download pipeline (regular files).
pub async fn populate(
    guard: &PopulateGuard,
    meta_store: &dyn MetaStore,
    cache: &CacheManager,
    backend: &Backend,
    target: &str,
) -> FsResult<()> {
    let components: Vec<&str> = target
        .trim_start_matches('/')
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();

    let mut prefix = PathBuf::new();
    for component in components {
        prefix.push(component);
        let backend_path = backend.path.join(&prefix);

        if backend_path.exists() {
            continue;
        }

        let meta = match meta_store.get(&backend_path)? {
            Some(m) => m,
            None => return Err(FsError::NoEntry),
        };

        let already_populated = meta_store
            .stat(&backend_path)?
            .map(MetaState::populated)
            .unwrap_or(false);

        if already_populated {
            cleanup_meta(meta_store, &backend_path, 0)?;
            continue;
        }

        populate_one(guard, meta_store, cache, backend, &backend_path, &meta).await?;

        meta_store.set_stat(&backend_path, MetaState(crate::meta::STATE_POPULATED))?;
        cleanup_meta(meta_store, &backend_path, 0)?;
    }

    Ok(())
}

async fn populate_one(
    guard: &PopulateGuard,
    meta_store: &dyn MetaStore,
    cache: &CacheManager,
    backend: &Backend,
    backend_path: &Path,
    meta: &crate::meta::MetaData,
) -> FsResult<()> {
    // Re-check under the stripe lock: another thread may have raced us here
    // between the outer `exists()` check and now.
    let needs_work = guard.with_lock(backend_path, || !backend_path.exists());
    if !needs_work {
        return Ok(());
    }

    match meta.filetype {
        FileKind::Directory => {
            std::fs::create_dir_all(backend_path)?;
            set_backend_mode(backend_path, meta.permissions)?;
        }
        FileKind::Regular => {
            download_file(cache, backend, meta, backend_path).await?;
        }
        FileKind::Symlink => {
            // The link's own sidecar governs it; the target is not
            // separately populated here.
            std::os::unix::fs::symlink(&meta.extended, backend_path)?;
        }
        FileKind::Block | FileKind::Char | FileKind::Fifo | FileKind::Socket => {
            mknod_special(backend_path, meta)?;
        }
    }

    Ok(())
}

fn set_backend_mode(path: &Path, mode: u32) -> FsResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

fn mknod_special(path: &Path, meta: &crate::meta::MetaData) -> FsResult<()> {
    let type_bits = match meta.filetype {
        FileKind::Block => libc::S_IFBLK,
        FileKind::Char => libc::S_IFCHR,
        FileKind::Fifo => libc::S_IFIFO,
        FileKind::Socket => libc::S_IFSOCK,
        _ => unreachable!("mknod_special called with a non-device filetype"),
    };
    let mode = meta.permissions | type_bits;
    let dev = unsafe { libc::makedev(meta.dev_major, meta.dev_minor) };
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| FsError::Corrupt(e.to_string()))?;
    let rc = unsafe { libc::mknod(c_path.as_ptr(), mode, dev) };
    if rc != 0 {
        return Err(FsError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Depth-bounded sidecar pruning after a path is marked populated —
/// spec.md §4.6 step 4: regular files and simple leaves drop their
/// sidecar immediately; directories recurse into children up to depth 2,
/// deleting only fully-populated, child-empty sidecars, bounding
/// in-memory state growth on large mounts.
pub fn cleanup_meta(meta_store: &dyn MetaStore, path: &Path, level: usize) -> FsResult<()> {
    let state = match meta_store.stat(path)? {
        Some(s) => s,
        None => return Ok(()),
    };
    if !state.populated() {
        return Ok(());
    }

    if level >= 2 {
        return Ok(());
    }

    let children = meta_store.children(path)?;
    if children.is_empty() {
        meta_store.delete(path)?;
        return Ok(());
    }

    for child in &children {
        cleanup_meta(meta_store, child, level + 1)?;
    }

    let remaining = meta_store.children(path)?;
    if remaining.is_empty() {
        meta_store.delete(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::origin_layer::OriginLayer;
    use crate::config::Stor;
    use crate::meta::tree::TreeMetaStore;
    use crate::meta::MetaData;
    use crate::store::ObjectStore;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::Arc;

    struct FakeStore;
    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn get(&self, _namespace: &str, _hash: &str) -> FsResult<crate::store::ObjectStream> {
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams::default();
            brotli::BrotliCompress(&mut Cursor::new(b"contents".to_vec()), &mut out, &params).unwrap();
            Ok(Box::new(Cursor::new(out)))
        }
        async fn put(&self, _namespace: &str, _body: Vec<u8>) -> FsResult<()> {
            Ok(())
        }
    }

    fn cache_manager(namespace: &str) -> CacheManager {
        CacheManager::new(vec![Arc::new(OriginLayer::new(Arc::new(FakeStore), namespace))])
    }

    fn backend(dir: &Path) -> Backend {
        Backend {
            path: dir.to_path_buf(),
            stor: Stor {
                addr: "http://localhost".into(),
                login: None,
                passwd: None,
            },
            namespace: "ns".into(),
            encrypted: false,
            user_rsa_private_pem: None,
            user_rsa_public_pem: None,
            store_rsa_public_pem: None,
            upload: false,
            push_interval_secs: 60,
            cleanup_interval_secs: 3600,
            cleanup_older_than_hours: 24,
            log: None,
            meta_store: Default::default(),
            tracker: Default::default(),
            file_timeout_secs: 900,
            max_upload_workers: 10,
            cache_dir: None,
            cache_dedupe: "dedupe".into(),
        }
    }

    #[tokio::test]
    async fn populates_directory_then_file() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(dir.path());
        let meta_store = TreeMetaStore::new();
        let guard = PopulateGuard::new();
        let cache = cache_manager(&be.namespace);

        let dir_path = be.path.join("sub");
        let mut dir_meta = MetaData::from_entry(&crate::manifest::Entry {
            path: "/sub".into(),
            hash: String::new(),
            size: 0,
            uname: "root".into(),
            gname: "root".into(),
            perms: 0o755,
            filetype: FileKind::Directory,
            ctime: 0,
            mtime: 0,
            extended: String::new(),
            dev_major: 0,
            dev_minor: 0,
        });
        dir_meta.state = crate::meta::MetaState(crate::meta::STATE_INITIAL);
        meta_store.save(&dir_path, &dir_meta).unwrap();

        let file_path = dir_path.join("f.bin");
        let mut file_meta = MetaData::from_entry(&crate::manifest::Entry {
            path: "/sub/f.bin".into(),
            hash: "h".into(),
            size: 8,
            uname: "root".into(),
            gname: "root".into(),
            perms: 0o644,
            filetype: FileKind::Regular,
            ctime: 0,
            mtime: 0,
            extended: String::new(),
            dev_major: 0,
            dev_minor: 0,
        });
        file_meta.state = crate::meta::MetaState(crate::meta::STATE_INITIAL);
        meta_store.save(&file_path, &file_meta).unwrap();

        populate(&guard, &meta_store, &cache, &be, "/sub/f.bin")
            .await
            .unwrap();

        assert!(file_path.exists());
        assert_eq!(std::fs::read(&file_path).unwrap(), b"contents");
    }

    #[tokio::test]
    async fn missing_meta_is_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let be = backend(dir.path());
        let meta_store = TreeMetaStore::new();
        let guard = PopulateGuard::new();
        let cache = cache_manager(&be.namespace);

        let err = populate(&guard, &meta_store, &cache, &be, "/nope")
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NoEntry));
    }
}
