mod config;
mod fs;

use fs::{RemoteFS, Shared, TrackerHandle};
use fs_core::cache::fs_layer::FsCacheLayer;
use fs_core::cache::manager::ORIGIN_TIMEOUT;
use fs_core::cache::{CacheLayer, CacheManager, OriginLayer};
use fs_core::meta::sled_store::SledMetaStore;
use fs_core::meta::tree::TreeMetaStore;
use fs_core::meta::{populate_from_manifest, MetaStore};
use fs_core::store::http::HttpStore;
use fs_core::store::ObjectStore;
use fs_core::tlog::TLog;
use fs_core::tracker::{ChangeTracker, MapTracker, SidecarTracker};
use fuser::MountOption;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cfg = match config::load_mount_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cfg.backend.path) {
        eprintln!("creating backend path {:?}: {e}", cfg.backend.path);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("starting tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let meta_store: Arc<dyn MetaStore> = match cfg.backend.meta_store {
        fs_core::config::MetaStoreKind::Tree => Arc::new(TreeMetaStore::new()),
        fs_core::config::MetaStoreKind::Sled => {
            match SledMetaStore::open(cfg.backend.path.join(".meta.sled")) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    eprintln!("opening sled meta store: {e}");
                    std::process::exit(1);
                }
            }
        }
    };

    if let Err(e) = load_manifest(&cfg, meta_store.as_ref()) {
        eprintln!("populating from manifest {:?}: {e}", cfg.flist);
        std::process::exit(1);
    }

    let object_store: Arc<dyn ObjectStore> = Arc::new(HttpStore::new(cfg.backend.stor.addr.clone()));

    // Layers are added highest-priority first: a local-FS cache tier (C3),
    // when configured, races ahead of the origin store and receives
    // write-back on a miss it didn't win — spec.md §4.3/§4.4. The origin
    // layer is always last, since it's the store of record.
    let mut layers: Vec<Arc<dyn CacheLayer>> = Vec::new();
    if let Some(cache_dir) = &cfg.backend.cache_dir {
        layers.push(Arc::new(FsCacheLayer::new(
            cache_dir.clone(),
            cfg.backend.cache_dedupe.clone(),
        )));
    }
    layers.push(Arc::new(OriginLayer::new(
        object_store.clone(),
        cfg.backend.namespace.clone(),
    )));
    // The origin/store tier gets the longer 10s deadline (spec.md §4.4
    // point 4); a manager whose layers are all origin-tier is the common
    // case for this binary today, so the same tier applies uniformly.
    let cache = Arc::new(CacheManager::new(layers).with_timeout(ORIGIN_TIMEOUT));

    let tracker = Arc::new(match cfg.backend.tracker {
        fs_core::config::TrackerKind::Map => {
            TrackerHandle::Map(MapTracker::new(Duration::from_secs(cfg.backend.file_timeout_secs)))
        }
        fs_core::config::TrackerKind::Sidecar => TrackerHandle::Sidecar,
    });

    let tlog = match TLog::open(cfg.backend.path.join(".tlog")) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("opening tlog: {e}");
            std::process::exit(1);
        }
    };

    let shared = Shared {
        backend: cfg.backend.clone(),
        mode: cfg.mode,
        meta_store: meta_store.clone(),
        cache: cache.clone(),
        object_store: object_store.clone(),
        tracker: tracker.clone(),
        tlog: tlog.clone(),
        populate_guard: Arc::new(fs_core::populate::PopulateGuard::new()),
        runtime: runtime.handle().clone(),
        kernel_attr_ttl: Duration::from_secs(cfg.kernel_attr_timeout_seconds),
        kernel_entry_ttl: Duration::from_secs(cfg.kernel_entry_timeout_seconds),
    };

    if cfg.backend.upload {
        runtime.spawn(upload_cron(
            cfg.backend.clone(),
            meta_store.clone(),
            object_store.clone(),
            tracker.clone(),
            tlog.clone(),
        ));
    }
    runtime.spawn(cleaner_cron(cfg.backend.clone(), meta_store.clone()));

    if cli.no_mount {
        tracing::info!("--no-mount set, running cron loops only; Ctrl-C to exit");
        runtime.block_on(std::future::pending::<()>());
        return;
    }

    let filesystem = fs::FsWrapper(Arc::new(std::sync::Mutex::new(RemoteFS::new(shared))));
    let options = vec![
        MountOption::AutoUnmount,
        MountOption::FSName("remotefs".to_string()),
        if cfg.mode == fs_core::config::Mode::Ro {
            MountOption::RO
        } else {
            MountOption::RW
        },
    ];

    tracing::info!(mountpoint = ?cfg.path, "mounting");
    if let Err(e) = fuser::mount2(filesystem, &cfg.path, &options) {
        eprintln!("failed to mount filesystem: {e}");
        std::process::exit(1);
    }
}

/// Reads and parses the flist, logging (not aborting on) individually
/// malformed lines — spec.md §4.5/S6 — then folds the parsed entries into
/// the meta store.
fn load_manifest(cfg: &fs_core::config::MountConfig, meta_store: &dyn MetaStore) -> std::io::Result<()> {
    let contents = std::fs::read_to_string(&cfg.flist)?;
    let parsed = fs_core::manifest::parse_manifest(&cfg.trim_base, &contents);

    let mut entries = Vec::with_capacity(parsed.len());
    for (line_no, result) in parsed {
        match result {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping malformed manifest line"),
        }
    }

    if let Err(e) = populate_from_manifest(meta_store, &cfg.backend.path, &entries) {
        tracing::error!(error = %e, "populating meta store from manifest");
    }
    Ok(())
}

async fn upload_cron(
    backend: fs_core::config::Backend,
    meta_store: Arc<dyn MetaStore>,
    object_store: Arc<dyn ObjectStore>,
    tracker: Arc<TrackerHandle>,
    tlog: Arc<TLog>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(backend.push_interval_secs.max(1)));
    loop {
        interval.tick().await;
        let failures = match tracker.as_ref() {
            TrackerHandle::Map(t) => {
                fs_core::upload::run_once(&backend, meta_store.as_ref(), object_store.as_ref(), t, tlog.as_ref())
                    .await
            }
            TrackerHandle::Sidecar => {
                let sidecar_tracker = SidecarTracker::new(meta_store.as_ref(), backend.path.clone());
                run_upload_with(&backend, meta_store.as_ref(), object_store.as_ref(), &sidecar_tracker, tlog.as_ref())
                    .await
            }
        };
        for (path, err) in failures {
            tracing::warn!(?path, error = %err, "upload failed, will retry next cycle");
        }
    }
}

async fn run_upload_with(
    backend: &fs_core::config::Backend,
    meta_store: &dyn MetaStore,
    object_store: &dyn ObjectStore,
    tracker: &dyn ChangeTracker,
    tlog: &TLog,
) -> Vec<(std::path::PathBuf, fs_core::FsError)> {
    fs_core::upload::run_once(backend, meta_store, object_store, tracker, tlog).await
}

async fn cleaner_cron(backend: fs_core::config::Backend, meta_store: Arc<dyn MetaStore>) {
    let mut interval = tokio::time::interval(Duration::from_secs(backend.cleanup_interval_secs.max(1)));
    let older_than = Duration::from_secs(backend.cleanup_older_than_hours.saturating_mul(3600));
    loop {
        interval.tick().await;
        match tokio::task::block_in_place(|| fs_core::cleaner::run_once(meta_store.as_ref(), &backend.path, older_than)) {
            Ok(n) if n > 0 => tracing::info!(evicted = n, "cleaner pass complete"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "cleaner pass failed"),
        }
    }
}
