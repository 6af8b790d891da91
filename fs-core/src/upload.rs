//! Upload pipeline (C7, upload half) — spec.md §4.7/§6, grounded in
//! `original_source/watcher/watcher.go`'s `processFile`.
//!
//! A background worker drains a `ChangeTracker`'s ready paths, and for
//! each one: snapshots the live data file to a sibling `<path>_<nanos>.aydo`
//! (so a concurrent writer never races the upload's own read), tees a MD5
//! hash while streaming the snapshot, optionally AES-CFB encrypts under a
//! session key derived from that hash (RSA-wrapped for both the user and
//! the store), brotli-compresses, POSTs the result, rewrites the sidecar
//! to the populated state, and appends a tlog record. Concurrency is
//! bounded by a `tokio::sync::Semaphore` — the idiomatic async analog of
//! the original's `tunny` worker pool.

use crate::config::Backend;
use crate::crypto::{self, HashingReader};
use crate::error::{FsError, FsResult};
use crate::meta::MetaStore;
use crate::store::ObjectStore;
use crate::tlog::TLog;
use crate::tracker::ChangeTracker;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;

/// Drains every path `tracker` reports ready and uploads each one,
/// bounded to `backend.max_upload_workers` concurrent tasks. Paths whose
/// upload fails stay tracked — they're retried on the next tick.
pub async fn run_once(
    backend: &Backend,
    meta_store: &dyn MetaStore,
    store: &dyn ObjectStore,
    tracker: &dyn ChangeTracker,
    tlog: &TLog,
) -> Vec<(PathBuf, FsError)> {
    let ready = tracker.ready_iter();
    if ready.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(backend.max_upload_workers.max(1)));
    let mut failures = Vec::new();

    // `ObjectStore`/`MetaStore` are trait objects borrowed for the whole
    // call, so tasks run as a join set rather than detached spawns —
    // still bounded by the semaphore, without needing `'static` handles.
    let mut in_flight = Vec::new();
    for path in ready {
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let fut = async {
            let result = upload_one(backend, meta_store, store, &path).await;
            drop(permit);
            (path, result)
        };
        in_flight.push(fut);
    }

    let results = futures_util::future::join_all(in_flight).await;
    for (path, result) in results {
        match result {
            Ok(hex_hash) => {
                let unix_seconds = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                if let Err(e) = tlog.append(&path.to_string_lossy(), &hex_hash, unix_seconds) {
                    tracing::warn!(path = %path.display(), error = %e, "tlog append failed");
                }
                tracker.forget(&path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "upload failed, will retry");
                failures.push((path, e));
            }
        }
    }

    failures
}

/// Uploads a single backend path, returning the hex MD5 of its snapshot
/// on success.
async fn upload_one(
    backend: &Backend,
    meta_store: &dyn MetaStore,
    store: &dyn ObjectStore,
    path: &Path,
) -> FsResult<String> {
    tracing::debug!(path = %path.display(), "uploading");

    let mut meta = meta_store
        .get(path)?
        .ok_or_else(|| FsError::BadMeta {
            path: path.to_path_buf(),
            reason: "no sidecar for a path reported ready by the change tracker".into(),
        })?;

    let snapshot_path = snapshot_path_for(path);
    std::fs::copy(path, &snapshot_path)?;

    let snapshot_len = std::fs::metadata(&snapshot_path).map(|m| m.len()).ok();

    let upload_result = upload_snapshot(backend, store, &snapshot_path, &mut meta).await;
    let _ = std::fs::remove_file(&snapshot_path);
    let hex_hash = upload_result?;

    meta.hash = hex_hash.clone();
    // `original_source/watcher/watcher.go`'s `processFile` sets `m.Size`
    // from the same `stat()` it snapshots from, on every upload.
    if let Some(len) = snapshot_len {
        meta.size = len;
    }
    meta_store.save(path, &meta)?;
    if let Some(mut state) = meta_store.stat(path)? {
        state.clear();
        meta_store.set_stat(path, state)?;
    }

    Ok(hex_hash)
}

async fn upload_snapshot(
    backend: &Backend,
    store: &dyn ObjectStore,
    snapshot_path: &Path,
    meta: &mut crate::meta::MetaData,
) -> FsResult<String> {
    let file = std::fs::File::open(snapshot_path)?;
    let mut hasher = HashingReader::new(file)?;
    let mut plaintext = Vec::new();
    hasher.read_to_end(&mut plaintext)?;
    // The session key is derived from the *plaintext* hash, per
    // `original_source/watcher/watcher.go`'s `encrypt` (`CreateSessionKey`
    // runs before the file is transformed). The hash that addresses the
    // object in the store, below, is a separate value: the hash of the
    // bytes actually POSTed, matching the same file's `m.Hash = enc.hash`
    // reassignment once the content has been encrypted.
    let plaintext_hash_hex = hasher.finish_hex()?;

    let body = if backend.encrypted {
        let session_key = crypto::session_key_from_hash(&plaintext_hash_hex)?;

        let user_pem_path = backend
            .user_rsa_public_pem
            .as_ref()
            .ok_or(FsError::MissingKey)?;
        let store_pem_path = backend
            .store_rsa_public_pem
            .as_ref()
            .ok_or(FsError::MissingKey)?;
        let user_pub = crypto::read_public_key_pem(&std::fs::read(user_pem_path)?)?;
        let store_pub = crypto::read_public_key_pem(&std::fs::read(store_pem_path)?)?;
        let (user_key_hex, store_key_hex) =
            crypto::wrap_session_key(&session_key, &user_pub, &store_pub)?;
        meta.user_key = user_key_hex;
        meta.store_key = store_key_hex;

        let mut encrypted = Vec::new();
        crypto::encrypt_sym(&session_key, Cursor::new(&plaintext), &mut encrypted)?;
        encrypted
    } else {
        plaintext
    };

    let compressed = brotli_compress(&body)?;
    // The store addresses objects by the hash of the bytes it actually
    // receives, so the client computes that same hash locally rather than
    // round-tripping it through the POST response.
    let object_hash = crypto::md5_hex_of(Cursor::new(&compressed))?;
    store.put(&backend.namespace, compressed).await?;
    Ok(object_hash)
}

fn brotli_compress(data: &[u8]) -> FsResult<Vec<u8>> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams::default();
    brotli::BrotliCompress(&mut Cursor::new(data), &mut out, &params)
        .map_err(|e| FsError::Corrupt(e.to_string()))?;
    Ok(out)
}

/// `<path>_<nanos>.aydo` — matches `original_source/watcher/watcher.go`'s
/// snapshot naming, which isolates the upload's read from a writer
/// reopening the same path mid-upload.
fn snapshot_path_for(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("_{nanos}.aydo"));
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stor;
    use crate::manifest::FileKind;
    use crate::meta::tree::TreeMetaStore;
    use crate::meta::{MetaData, MetaState};
    use crate::tlog::TLog;
    use crate::tracker::MapTracker;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct CapturingStore {
        bodies: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for CapturingStore {
        async fn get(&self, _namespace: &str, _hash: &str) -> FsResult<crate::store::ObjectStream> {
            Err(FsError::NotImplemented)
        }
        async fn put(&self, _namespace: &str, body: Vec<u8>) -> FsResult<()> {
            self.bodies.lock().unwrap().push(body);
            Ok(())
        }
    }

    fn test_backend(dir: &Path) -> Backend {
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
            upload: true,
            push_interval_secs: 60,
            cleanup_interval_secs: 3600,
            cleanup_older_than_hours: 24,
            log: None,
            meta_store: Default::default(),
            tracker: Default::default(),
            file_timeout_secs: 900,
            max_upload_workers: 4,
            cache_dir: None,
            cache_dedupe: "dedupe".into(),
        }
    }

    fn test_meta() -> MetaData {
        MetaData {
            hash: "stale".into(),
            size: 5,
            uname: "root".into(),
            uid: 0,
            gname: "root".into(),
            gid: 0,
            permissions: 0o644,
            filetype: FileKind::Regular,
            ctime: 0,
            mtime: 0,
            extended: String::new(),
            dev_major: 0,
            dev_minor: 0,
            user_key: String::new(),
            store_key: String::new(),
            state: MetaState(0),
        }
    }

    #[tokio::test]
    async fn uploads_ready_path_and_rewrites_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let backend = test_backend(dir.path());
        let data_path = dir.path().join("a.txt");
        std::fs::write(&data_path, b"hello").unwrap();

        let meta_store = TreeMetaStore::new();
        meta_store.save(&data_path, &test_meta()).unwrap();

        let tracker = MapTracker::new(Duration::from_secs(900));
        tracker.touch(&data_path);
        tracker.close(&data_path);

        let store = CapturingStore {
            bodies: StdMutex::new(Vec::new()),
        };
        let tlog = TLog::open(dir.path().join("up.tlog")).unwrap();

        let failures = run_once(&backend, &meta_store, &store, &tracker, &tlog)
            .await;
        assert!(failures.is_empty());
        assert_eq!(store.bodies.lock().unwrap().len(), 1);
        assert!(tracker.ready_iter().is_empty());

        let saved = meta_store.get(&data_path).unwrap().unwrap();
        assert_ne!(saved.hash, "stale");

        let state = meta_store.stat(&data_path).unwrap().unwrap();
        assert!(state.populated());

        let log_contents = std::fs::read_to_string(dir.path().join("up.tlog")).unwrap();
        assert!(log_contents.contains(&data_path.to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn no_ready_paths_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let backend = test_backend(dir.path());
        let meta_store = TreeMetaStore::new();
        let tracker = MapTracker::default();
        let store = CapturingStore {
            bodies: StdMutex::new(Vec::new()),
        };
        let tlog = TLog::open(dir.path().join("up.tlog")).unwrap();

        let failures = run_once(&backend, &meta_store, &store, &tracker, &tlog).await;
        assert!(failures.is_empty());
        assert!(store.bodies.lock().unwrap().is_empty());
    }
}
