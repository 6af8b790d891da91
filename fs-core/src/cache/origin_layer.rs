//! Adapts the origin `ObjectStore` (C2) into a `CacheLayer` (C3) so the
//! cache manager's race (C4) always has a last-resort layer to fall back
//! to, matching spec.md §2's read data flow literally: `open(hash)` on C4
//! races C3 layers, one of which is the origin store itself.
//!
//! Read-only and not purgeable: the origin is authoritative, not a cache
//! tier other layers write back into. `ObjectStore::get` promises only a
//! one-shot reader (spec.md §4.2); this layer buffers it fully so the
//! manager's write-back can rewind the winning stream to offset 0, the
//! same tradeoff `cache::http_layer::HttpCacheLayer` makes.

use super::{CacheLayer, CacheStream};
use crate::error::FsResult;
use crate::store::ObjectStore;
use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::sync::Arc;

pub struct OriginLayer {
    store: Arc<dyn ObjectStore>,
    namespace: String,
    name: String,
}

impl OriginLayer {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        OriginLayer {
            store,
            name: format!("origin:{namespace}"),
            namespace,
        }
    }
}

#[async_trait]
impl CacheLayer for OriginLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, hash: &str) -> FsResult<CacheStream> {
        let mut reader = self.store.get(&self.namespace, hash).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Box::new(Cursor::new(buf)))
    }

    async fn get_meta(&self, id: &str) -> FsResult<Vec<String>> {
        self.store.get_meta(&self.namespace, id).await
    }

    async fn exists(&self, _hash: &str) -> bool {
        // The origin has no cheap existence probe in the `ObjectStore`
        // contract (spec.md §4.2 names only `get`/`put`/`get_meta`); treat
        // it as always reachable and let a losing `open` in the race speak
        // for itself.
        true
    }
}
