//! Download pipeline — spec.md §4.6's per-file procedure, grounded in
//! `original_source/rw/file.go` `download()`.
//!
//! fetch (racing the cache manager, C4, per spec.md §2's read data flow)
//! → brotli-decompress → optional AES-CFB decrypt (RSA-unwrapped session
//! key) → write to backend → best-effort chown/chmod/utime.

use crate::cache::CacheManager;
use crate::config::Backend;
use crate::crypto;
use crate::error::{FsError, FsResult};
use crate::meta::MetaData;
use std::io::{Read, Write};
use std::path::Path;

/// Downloads the content addressed by `meta.hash` by racing `cache`'s
/// layers (spec.md §2: "`open(hash)` on C4 races C3 layers") and writes
/// the result to `backend_path`. On any error the partial file is
/// removed — the populate-before-use ordering guarantee of spec.md §5.
pub async fn download_file(
    cache: &CacheManager,
    backend: &Backend,
    meta: &MetaData,
    backend_path: &Path,
) -> FsResult<()> {
    let result = download_file_inner(cache, backend, meta, backend_path).await;
    if result.is_err() {
        let _ = std::fs::remove_file(backend_path);
    }
    result?;

    restore_attrs(backend, meta, backend_path);
    Ok(())
}

async fn download_file_inner(
    cache: &CacheManager,
    backend: &Backend,
    meta: &MetaData,
    backend_path: &Path,
) -> FsResult<()> {
    tracing::debug!(hash = %meta.hash, path = %backend_path.display(), "downloading");

    // The winning stream's write-back into higher writable layers happens
    // inside `finish()` — exactly once, per spec.md §5's racing-open
    // correctness property — before we ever touch the bytes here.
    let wire_bytes = cache.open(&meta.hash).await?.finish(&meta.hash).await?;

    let mut decoded = Vec::new();
    {
        let mut decoder = brotli::Decompressor::new(wire_bytes.as_slice(), 64 * 1024);
        decoder
            .read_to_end(&mut decoded)
            .map_err(|e| FsError::Corrupt(e.to_string()))?;
    }

    if let Some(parent) = backend_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if backend.encrypted {
        if meta.user_key.is_empty() {
            return Err(FsError::MissingKey);
        }
        let priv_pem_path = backend
            .user_rsa_private_pem
            .as_ref()
            .ok_or(FsError::MissingKey)?;
        let priv_pem = std::fs::read(priv_pem_path)?;
        let priv_key = crypto::read_private_key_pem(&priv_pem)?;
        let session_key = crypto::unwrap_session_key(&meta.user_key, &priv_key)?;

        let mut out = std::fs::File::create(backend_path)?;
        crypto::decrypt_sym(&session_key, decoded.as_slice(), &mut out)?;
    } else {
        let mut out = std::fs::File::create(backend_path)?;
        out.write_all(&decoded)?;
    }

    Ok(())
}

/// Applies owner/mode/times from the sidecar. Each step may fail
/// independently; failures are logged but never invalidate the file —
/// spec.md §4.6 step 6.
fn restore_attrs(backend: &Backend, meta: &MetaData, backend_path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(
        backend_path,
        std::fs::Permissions::from_mode(meta.permissions),
    ) {
        tracing::warn!(path = %backend_path.display(), error = %e, "chmod after download failed");
    }

    // chown/utime require root or matching ownership on most systems; a
    // failure here is expected and non-fatal under test harnesses.
    if unsafe { libc::geteuid() } == 0 {
        let c_path = match std::ffi::CString::new(backend_path.as_os_str().as_encoded_bytes()) {
            Ok(p) => p,
            Err(_) => return,
        };
        let rc = unsafe { libc::chown(c_path.as_ptr(), meta.uid, meta.gid) };
        if rc != 0 {
            tracing::warn!(path = %backend_path.display(), "chown after download failed");
        }
    }

    let times = libc::timespec {
        tv_sec: meta.mtime,
        tv_nsec: 0,
    };
    let specs = [
        libc::timespec {
            tv_sec: meta.ctime,
            tv_nsec: 0,
        },
        times,
    ];
    if let Ok(c_path) = std::ffi::CString::new(backend_path.as_os_str().as_encoded_bytes()) {
        let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), specs.as_ptr(), 0) };
        if rc != 0 {
            tracing::warn!(path = %backend_path.display(), "utime after download failed");
        }
    }

    let _ = backend;
}
