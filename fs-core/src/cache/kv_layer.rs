//! Embedded KV cache layer — spec.md §4.3's fourth variant. The
//! distillation doesn't name a concrete engine; SPEC_FULL.md resolves it to
//! `sled`, this ecosystem's standard embedded KV store and the nearest
//! analog to `original_source/cache/boltcache.go`'s BoltDB-backed layer.
//!
//! Per spec.md §4.3's capability table, this layer supports only `open`
//! (by direct key lookup); `get_meta` and `dedupe` are unsupported, and
//! `exists` always reports true (the table specifies this literally —
//! existence isn't separately checked before a lookup is attempted).

use super::{CacheLayer, CacheStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::io::Cursor;

pub struct KvCacheLayer {
    db: sled::Db,
    name: String,
}

impl KvCacheLayer {
    pub fn open(path: impl AsRef<std::path::Path>) -> FsResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| FsError::Io(std::io::Error::other(e)))?;
        Ok(KvCacheLayer {
            db,
            name: format!("kv:{}", path.display()),
        })
    }
}

#[async_trait]
impl CacheLayer for KvCacheLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, hash: &str) -> FsResult<CacheStream> {
        match self.db.get(hash.as_bytes()) {
            Ok(Some(bytes)) => Ok(Box::new(Cursor::new(bytes.to_vec()))),
            Ok(None) => Err(FsError::NoEntry),
            Err(e) => Err(FsError::Io(std::io::Error::other(e))),
        }
    }

    async fn exists(&self, _hash: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_missing_key_is_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let layer = KvCacheLayer::open(dir.path().join("db")).unwrap();
        let err = layer.open("nope").await.unwrap_err();
        assert!(matches!(err, FsError::NoEntry));
    }

    #[tokio::test]
    async fn open_present_key() {
        let dir = tempfile::tempdir().unwrap();
        let layer = KvCacheLayer::open(dir.path().join("db")).unwrap();
        layer.db.insert(b"h1", b"payload".to_vec()).unwrap();
        let mut stream = layer.open("h1").await.unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut stream, &mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }
}
