//! HTTP object-store transport — spec.md §4.2 / §6's wire protocol.
//!
//! `GET <addr>/store/<namespace>/<hash>` with `Accept: application/brotli`;
//! `POST <addr>/<namespace>` with `Content-Type: application/octet-stream`,
//! expecting 201. Grounded in `original_source/rw/file.go`'s `download()`
//! and `original_source/watcher/watcher.go`'s `put()`.

use super::{ObjectStore, ObjectStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::io::Cursor;

pub struct HttpStore {
    addr: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn get(&self, namespace: &str, hash: &str) -> FsResult<ObjectStream> {
        let url = format!("{}/store/{}/{}", self.addr.trim_end_matches('/'), namespace, hash);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/brotli")
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FsError::NoEntry);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FsError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }

    async fn put(&self, namespace: &str, body: Vec<u8>) -> FsResult<()> {
        let url = format!("{}/{}", self.addr.trim_end_matches('/'), namespace);
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(FsError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn get_meta(&self, dedupe: &str, id: &str) -> FsResult<Vec<String>> {
        let url = format!(
            "{}/{}/md/{}.flist",
            self.addr.trim_end_matches('/'),
            dedupe,
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
}
