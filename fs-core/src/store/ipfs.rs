//! IPFS object-store transport — spec.md §4.2: "IPFS and SFTP variants
//! differ only in transport." IPFS exposes an HTTP API locally, so this is
//! a thin re-addressing of `HttpStore`'s request shape onto IPFS's
//! `/api/v0/cat` and `/api/v0/add` endpoints rather than a new protocol.

use super::{ObjectStore, ObjectStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::io::Cursor;

pub struct IpfsStore {
    api_addr: String,
    client: reqwest::Client,
}

impl IpfsStore {
    pub fn new(api_addr: impl Into<String>) -> Self {
        Self {
            api_addr: api_addr.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for IpfsStore {
    async fn get(&self, _namespace: &str, hash: &str) -> FsResult<ObjectStream> {
        let url = format!("{}/api/v0/cat?arg={}", self.api_addr, hash);
        let resp = self.client.post(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FsError::UpstreamError {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let bytes = resp.bytes().await?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }

    async fn put(&self, _namespace: &str, body: Vec<u8>) -> FsResult<()> {
        let url = format!("{}/api/v0/add", self.api_addr);
        let part = reqwest::multipart::Part::bytes(body);
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self.client.post(&url).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FsError::UpstreamError {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
