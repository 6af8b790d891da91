//! Object-store client — C2, spec.md §4.2.
//!
//! `ObjectStore` is the uniform capability every origin transport exposes:
//! `get(hash)` (a one-shot, non-seekable stream), `put(namespace, stream)`,
//! and an optional `get_meta(id)`. The HTTP implementation is the primary,
//! fully-built transport; IPFS and SFTP are thinner alternate transports
//! (spec.md: "IPFS and SFTP variants differ only in transport").

pub mod http;
pub mod ipfs;
pub mod sftp;

use crate::error::FsResult;
use async_trait::async_trait;
use std::io::Read;

/// A boxed, `Send` synchronous reader — the "one-shot reader" spec.md §4.2
/// requires `get` to return. Callers that need to seek wrap this in a
/// buffering adapter (see `crate::cache::http::BufferingSeeker`).
pub type ObjectStream = Box<dyn Read + Send>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches the blob addressed by `hash` from `namespace`. Fails with
    /// `FsError::NoEntry` on a 404, `FsError::UpstreamError` on any other
    /// non-success response.
    async fn get(&self, namespace: &str, hash: &str) -> FsResult<ObjectStream>;

    /// Uploads `body` under `namespace`. Fails with `FsError::UpstreamError`
    /// on any response other than 201.
    async fn put(&self, namespace: &str, body: Vec<u8>) -> FsResult<()>;

    /// Fetches a manifest's lines from the store's dedupe area, if the
    /// transport supports it.
    async fn get_meta(&self, _dedupe: &str, _id: &str) -> FsResult<Vec<String>> {
        Err(crate::error::FsError::NotImplemented)
    }
}
