//! HTTP cache layer — spec.md §4.3/§6's "Cache wire protocol (HTTP
//! variant)": `GET /<dedupe>/files/<hash>`, `GET /<dedupe>/md/<id>.flist`,
//! `HEAD /<path>` for existence. Read-only: HTTP never advertises
//! `is_writable`.
//!
//! The origin `ObjectStore::get` contract promises only a one-shot reader
//! (spec.md §4.2), but `CacheLayer::open` must return something seekable so
//! write-back can rewind it to offset 0 before deduping into a lower layer.
//! `BufferingSeeker` buffers the whole response into memory up front to
//! reconcile the two contracts — the tradeoff is recorded in DESIGN.md.

use super::{CacheLayer, CacheStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::io::Cursor;

pub type BufferingSeeker = Cursor<Vec<u8>>;

pub struct HttpCacheLayer {
    addr: String,
    dedupe: String,
    client: reqwest::Client,
    name: String,
}

impl HttpCacheLayer {
    pub fn new(addr: impl Into<String>, dedupe: impl Into<String>) -> Self {
        let addr = addr.into();
        HttpCacheLayer {
            name: format!("http:{addr}"),
            dedupe: dedupe.into(),
            addr,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CacheLayer for HttpCacheLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, hash: &str) -> FsResult<CacheStream> {
        let url = format!(
            "{}/{}/files/{}",
            self.addr.trim_end_matches('/'),
            self.dedupe,
            hash
        );
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FsError::NoEntry);
        }
        if !status.is_success() {
            return Err(FsError::UpstreamError {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let bytes = resp.bytes().await?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }

    async fn get_meta(&self, id: &str) -> FsResult<Vec<String>> {
        let url = format!(
            "{}/{}/md/{}.flist",
            self.addr.trim_end_matches('/'),
            self.dedupe,
            id
        );
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FsError::NoEntry);
        }
        if !status.is_success() {
            return Err(FsError::UpstreamError {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let text = resp.text().await?;
        Ok(text.lines().map(str::to_string).collect())
    }

    async fn exists(&self, hash: &str) -> bool {
        let url = format!(
            "{}/{}/files/{}",
            self.addr.trim_end_matches('/'),
            self.dedupe,
            hash
        );
        matches!(self.client.head(&url).send().await, Ok(r) if r.status() == reqwest::StatusCode::OK)
    }
}
