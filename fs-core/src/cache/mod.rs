//! Cache layer (C3) and cache manager (C4) — spec.md §4.3/§4.4.
//!
//! `CacheLayer` is the uniform capability every tier exposes; capability
//! bits (`is_writable`/`is_purgeable`) replace the original's interface
//! downcasting (Design Note §9), since Rust has no runtime type descent
//! as cheap as Go's.

pub mod fs_layer;
pub mod http_layer;
pub mod kv_layer;
pub mod manager;
pub mod origin_layer;
pub mod sftp_layer;

use crate::error::FsResult;
use async_trait::async_trait;
use std::io::Read;

pub use manager::CacheManager;
pub use origin_layer::OriginLayer;

/// A seekable, boxed reader — unlike `crate::store::ObjectStream`, cache
/// layers that wrap a one-shot transport (HTTP) must buffer it first so
/// that write-back (`dedupe`) can rewind to offset 0.
pub type CacheStream = Box<dyn ReadSeek + Send>;

pub trait ReadSeek: Read + std::io::Seek {}
impl<T: Read + std::io::Seek> ReadSeek for T {}

#[async_trait]
pub trait CacheLayer: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, hash: &str) -> FsResult<CacheStream>;

    async fn get_meta(&self, _id: &str) -> FsResult<Vec<String>> {
        Err(crate::error::FsError::NotImplemented)
    }

    async fn exists(&self, hash: &str) -> bool;

    fn is_writable(&self) -> bool {
        false
    }

    /// Writes `stream` (already rewound to offset 0) into this layer's
    /// dedupe area under `hash`. Only meaningful when `is_writable()`.
    async fn dedupe(&self, _hash: &str, _stream: CacheStream) -> FsResult<()> {
        Err(crate::error::FsError::NotImplemented)
    }

    fn is_purgeable(&self) -> bool {
        false
    }

    /// Empties this layer's dedupe area. Only meaningful when
    /// `is_purgeable()`.
    async fn purge(&self) -> FsResult<()> {
        Err(crate::error::FsError::NotImplemented)
    }
}
