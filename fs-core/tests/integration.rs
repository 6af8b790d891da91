//! End-to-end integration suite exercising the Testable Properties of
//! spec.md §8 across real module boundaries (manifest -> meta -> populate
//! -> download/upload -> tracker), rather than one module in isolation.
//! Uses an in-memory `ObjectStore` shared between the upload and download
//! pipelines so a round trip never touches the network.

use async_trait::async_trait;
use fs_core::config::{Backend, MetaStoreKind, Stor, TrackerKind};
use fs_core::manifest::{parse_line, Entry, FileKind};
use fs_core::meta::tree::TreeMetaStore;
use fs_core::meta::{populate_from_manifest, MetaState, MetaStore};
use fs_core::store::{ObjectStore, ObjectStream};
use fs_core::tlog::TLog;
use fs_core::tracker::{ChangeTracker, MapTracker};
use fs_core::{cache::manager::CacheManager, cache::origin_layer::OriginLayer, download, populate, upload};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A trivial content-addressed store backed by an in-memory map, standing
/// in for the HTTP origin in tests that need a real upload/download round
/// trip without a network harness.
struct InMemoryStore {
    objects: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    fn new() -> Self {
        InMemoryStore {
            objects: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, _namespace: &str, hash: &str) -> fs_core::FsResult<ObjectStream> {
        let objects = self.objects.lock().unwrap();
        match objects.get(hash) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(fs_core::FsError::NoEntry),
        }
    }

    async fn put(&self, _namespace: &str, body: Vec<u8>) -> fs_core::FsResult<()> {
        // The real store addresses objects by the hash of what it
        // received; mirror that so a subsequent `get(hash)` round-trips.
        let hash = fs_core::crypto::md5_hex_of(Cursor::new(&body))?;
        self.objects.lock().unwrap().insert(hash, body);
        Ok(())
    }
}

fn test_backend(dir: &Path, encrypted: bool) -> Backend {
    Backend {
        path: dir.to_path_buf(),
        stor: Stor {
            addr: "http://localhost".into(),
            login: None,
            passwd: None,
        },
        namespace: "ns".into(),
        encrypted,
        user_rsa_private_pem: None,
        user_rsa_public_pem: None,
        store_rsa_public_pem: None,
        upload: true,
        push_interval_secs: 60,
        cleanup_interval_secs: 3600,
        cleanup_older_than_hours: 24,
        log: None,
        meta_store: MetaStoreKind::Tree,
        tracker: TrackerKind::Map,
        file_timeout_secs: 900,
        max_upload_workers: 4,
        cache_dir: None,
        cache_dedupe: "dedupe".into(),
    }
}

fn cache_over<S: ObjectStore + 'static>(store: Arc<S>, namespace: &str) -> CacheManager {
    CacheManager::new(vec![Arc::new(OriginLayer::new(store, namespace))])
}

/// Testable Property 6 / scenario S5: write a file, upload it, drop the
/// backend copy, then re-download it through the populate pipeline. Runs
/// both unencrypted and RSA/AES-encrypted, since spec.md calls out that the
/// property "holds for encrypted and unencrypted backends."
#[tokio::test]
async fn upload_then_populate_round_trip_unencrypted() {
    let dir = tempfile::tempdir().unwrap();
    let backend = test_backend(dir.path(), false);
    let store = Arc::new(InMemoryStore::new());
    let cache = cache_over(store.clone(), &backend.namespace);

    let meta_store = TreeMetaStore::new();
    let data_path = backend.path.join("p");
    std::fs::write(&data_path, b"some content written locally").unwrap();
    meta_store
        .save(
            &data_path,
            &fs_core::meta::MetaData {
                hash: "stale".into(),
                size: 0,
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
                state: MetaState(fs_core::meta::STATE_MODIFIED),
            },
        )
        .unwrap();

    let tracker = MapTracker::new(Duration::from_secs(900));
    tracker.touch(&data_path);
    tracker.close(&data_path);
    let tlog = TLog::open(dir.path().join("up.tlog")).unwrap();

    let failures = upload::run_once(&backend, &meta_store, store.as_ref(), &tracker, &tlog).await;
    assert!(failures.is_empty());

    // Now the upload has cleared `modified` and recorded the real wire
    // hash; simulate eviction (sidecar kept, data file gone) and redownload
    // through the populate pipeline.
    std::fs::remove_file(&data_path).unwrap();
    let state = meta_store.stat(&data_path).unwrap().unwrap();
    assert!(state.populated());

    let guard = populate::PopulateGuard::new();
    populate::populate(&guard, &meta_store, &cache, &backend, "/p")
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(&data_path).unwrap(),
        b"some content written locally"
    );
}

#[tokio::test]
async fn upload_then_download_round_trip_encrypted() {
    use openssl::rsa::Rsa;

    let dir = tempfile::tempdir().unwrap();
    let mut backend = test_backend(dir.path(), true);

    let user_rsa = Rsa::generate(2048).unwrap();
    let store_rsa = Rsa::generate(2048).unwrap();
    let user_priv_path = dir.path().join("user_priv.pem");
    let user_pub_path = dir.path().join("user_pub.pem");
    let store_pub_path = dir.path().join("store_pub.pem");
    std::fs::write(&user_priv_path, user_rsa.private_key_to_pem().unwrap()).unwrap();
    std::fs::write(&user_pub_path, user_rsa.public_key_to_pem().unwrap()).unwrap();
    std::fs::write(&store_pub_path, store_rsa.public_key_to_pem().unwrap()).unwrap();
    backend.user_rsa_private_pem = Some(user_priv_path);
    backend.user_rsa_public_pem = Some(user_pub_path);
    backend.store_rsa_public_pem = Some(store_pub_path);

    let store = Arc::new(InMemoryStore::new());
    let cache = cache_over(store.clone(), &backend.namespace);
    let meta_store = TreeMetaStore::new();

    let plaintext: Vec<u8> = (0..1024u32).map(|b| (b % 256) as u8).collect();
    let data_path = backend.path.join("secret.bin");
    std::fs::write(&data_path, &plaintext).unwrap();
    meta_store
        .save(
            &data_path,
            &fs_core::meta::MetaData {
                hash: String::new(),
                size: 0,
                uname: "root".into(),
                uid: 0,
                gname: "root".into(),
                gid: 0,
                permissions: 0o600,
                filetype: FileKind::Regular,
                ctime: 0,
                mtime: 0,
                extended: String::new(),
                dev_major: 0,
                dev_minor: 0,
                user_key: String::new(),
                store_key: String::new(),
                state: MetaState(fs_core::meta::STATE_MODIFIED),
            },
        )
        .unwrap();

    let tracker = MapTracker::new(Duration::from_secs(900));
    tracker.touch(&data_path);
    tracker.close(&data_path);
    let tlog = TLog::open(dir.path().join("up.tlog")).unwrap();

    let failures = upload::run_once(&backend, &meta_store, store.as_ref(), &tracker, &tlog).await;
    assert!(failures.is_empty(), "{failures:?}");

    let saved = meta_store.get(&data_path).unwrap().unwrap();
    assert!(!saved.user_key.is_empty(), "sidecar must carry a wrapped session key for an encrypted backend");

    // The sidecar's UserKey must RSA-decrypt to a 32-byte session key under
    // the configured client private key (scenario S5's explicit check).
    let recovered = fs_core::crypto::unwrap_session_key(&saved.user_key, &user_rsa).unwrap();
    assert_eq!(recovered.len(), 32);

    std::fs::remove_file(&data_path).unwrap();

    download::download_file(&cache, &backend, &saved, &data_path)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&data_path).unwrap(), plaintext);
}

/// Testable Property 4: a second `populate` call for an already-populated
/// path performs no download — the backend path already exists, so the
/// walk short-circuits at the `backend_path.exists()` check before ever
/// consulting the cache manager.
#[tokio::test]
async fn populate_is_idempotent() {
    struct CountingStore {
        inner: InMemoryStore,
        gets: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn get(&self, namespace: &str, hash: &str) -> fs_core::FsResult<ObjectStream> {
            self.gets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.get(namespace, hash).await
        }
        async fn put(&self, namespace: &str, body: Vec<u8>) -> fs_core::FsResult<()> {
            self.inner.put(namespace, body).await
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let backend = test_backend(dir.path(), false);
    let inner = InMemoryStore::new();
    inner
        .objects
        .lock()
        .unwrap()
        .insert("h".to_string(), brotli_of(b"downloaded once"));
    let store = Arc::new(CountingStore {
        inner,
        gets: std::sync::atomic::AtomicUsize::new(0),
    });
    let cache = cache_over(store.clone(), &backend.namespace);

    let meta_store = TreeMetaStore::new();
    let data_path = backend.path.join("f");
    meta_store
        .save(
            &data_path,
            &fs_core::meta::MetaData {
                hash: "h".into(),
                size: 15,
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
                state: MetaState(fs_core::meta::STATE_INITIAL),
            },
        )
        .unwrap();

    let guard = populate::PopulateGuard::new();
    populate::populate(&guard, &meta_store, &cache, &backend, "/f")
        .await
        .unwrap();
    assert_eq!(store.gets.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Second call: the backend path already exists, so it must not
    // re-download.
    populate::populate(&guard, &meta_store, &cache, &backend, "/f")
        .await
        .unwrap();
    assert_eq!(store.gets.load(std::sync::atomic::Ordering::SeqCst), 1);
}

fn brotli_of(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams::default();
    brotli::BrotliCompress(&mut Cursor::new(data.to_vec()), &mut out, &params).unwrap();
    out
}

/// Testable Property 7 (state machine summary) end to end: writing a file
/// flips `modified`; a cron upload clears it; a manifest reload then
/// refuses to overwrite a still-`modified` sidecar; `Unlink`-style deletion
/// sets `deleted` and the path stays invisible across a further reload.
/// Testable Property 5 (overlay hiding) is the deletion half of this same
/// walk: tombstoning a path must survive a manifest reload.
#[tokio::test]
async fn state_machine_write_upload_reload_delete() {
    let dir = tempfile::tempdir().unwrap();
    let backend = test_backend(dir.path(), false);
    let store = Arc::new(InMemoryStore::new());
    let meta_store = TreeMetaStore::new();

    let entry = Entry {
        path: "/x".into(),
        hash: "original-hash".into(),
        size: 3,
        uname: "root".into(),
        gname: "root".into(),
        perms: 0o644,
        filetype: FileKind::Regular,
        ctime: 1,
        mtime: 1,
        extended: String::new(),
        dev_major: 0,
        dev_minor: 0,
    };

    // Initial manifest import.
    populate_from_manifest(&meta_store, &backend.path, std::slice::from_ref(&entry)).unwrap();
    let data_path = backend.path.join("x");
    let state = meta_store.stat(&data_path).unwrap().unwrap();
    assert!(state.initial());

    // A write (simulated: a real FUSE `Write` dispatch calls
    // `tracker.touch` and leaves the sidecar's state alone until upload —
    // here we drive the state bit directly the way `SidecarTracker` would
    // in purge-tracker mode, and populate the data file as if downloaded).
    std::fs::write(&data_path, b"new").unwrap();
    let mut md = meta_store.get(&data_path).unwrap().unwrap();
    md.state.set_modified();
    meta_store.save(&data_path, &md).unwrap();
    meta_store.set_stat(&data_path, md.state).unwrap();
    assert!(meta_store.stat(&data_path).unwrap().unwrap().modified());

    // Cron upload clears `modified`.
    let tracker = MapTracker::new(Duration::from_secs(900));
    tracker.touch(&data_path);
    tracker.close(&data_path);
    let tlog = TLog::open(dir.path().join("up.tlog")).unwrap();
    let failures = upload::run_once(&backend, &meta_store, store.as_ref(), &tracker, &tlog).await;
    assert!(failures.is_empty());
    assert!(meta_store.stat(&data_path).unwrap().unwrap().populated());

    // A manifest reload with the *stale* hash must not clobber the
    // now-populated/previously-modified sidecar, nor touch the data file,
    // per spec.md §3 Invariant 4 -- but since the entry is no longer
    // `modified` by the time of reload, the reload *is* allowed to run;
    // the invariant under test is that a reload during `modified` is a
    // no-op. Re-flip `modified` and confirm the reload skips it.
    let mut md = meta_store.get(&data_path).unwrap().unwrap();
    md.state.set_modified();
    meta_store.save(&data_path, &md).unwrap();
    meta_store.set_stat(&data_path, md.state).unwrap();
    let pre_reload_hash = md.hash.clone();
    assert_ne!(pre_reload_hash, "original-hash", "the upload must have already replaced the manifest-import hash");

    populate_from_manifest(&meta_store, &backend.path, std::slice::from_ref(&entry)).unwrap();
    let reloaded = meta_store.get(&data_path).unwrap().unwrap();
    assert_eq!(reloaded.hash, pre_reload_hash, "reload must not clobber a modified sidecar's hash with the manifest's");
    assert!(meta_store.stat(&data_path).unwrap().unwrap().modified());
    assert!(data_path.exists(), "reload must not touch the data file of a modified sidecar");

    // Unlink-style tombstone (overlay mode): remove the data file, flip
    // `deleted` on the sidecar.
    std::fs::remove_file(&data_path).unwrap();
    let mut md = meta_store.get(&data_path).unwrap().unwrap();
    md.state.set_deleted();
    meta_store.save(&data_path, &md).unwrap();
    meta_store.set_stat(&data_path, md.state).unwrap();
    assert!(meta_store.stat(&data_path).unwrap().unwrap().deleted());

    // A further manifest reload must not resurrect the tombstoned path.
    populate_from_manifest(&meta_store, &backend.path, std::slice::from_ref(&entry)).unwrap();
    assert!(meta_store.stat(&data_path).unwrap().unwrap().deleted());
    assert!(!data_path.exists());
}

/// Flist round-trip (Testable Property 1), exercised here with a line
/// carrying every optional field (symlink target, device numbers) rather
/// than the minimal case already covered by `manifest`'s own unit tests.
#[test]
fn flist_round_trip_with_dev_fields() {
    let line = "/dev/ttyS0|h|0|root|root|660|3|100|200||4,64";
    let parsed = parse_line("", 1, line).unwrap().unwrap();
    let formatted = fs_core::manifest::format_line(&parsed);
    let reparsed = parse_line("", 1, &formatted).unwrap().unwrap();
    assert_eq!(parsed, reparsed);
    assert_eq!(reparsed.dev_major, 4);
    assert_eq!(reparsed.dev_minor, 64);
}

/// Scenario S6: malformed flist lines don't abort the whole manifest; the
/// populator skips just the bad record.
#[test]
fn bad_manifest_lines_are_skipped_not_fatal() {
    let lines = "/a|h|1|u|g|644|2|1|1|\n/b|h|bad|u|g|644|2|1|1|\n/c|h|1|u|g|644|2|1|1|";
    let results = fs_core::manifest::parse_manifest("", lines);
    assert_eq!(results.len(), 3);
    assert!(results[0].1.as_ref().unwrap().is_some());
    assert!(results[1].1.is_err());
    assert!(results[2].1.as_ref().unwrap().is_some());
}
