//! SFTP+brotli cache layer — spec.md §4.3/§6: files live under
//! `<root>/<dedupe>/<hash>.bro`, brotli-encoded; manifests under
//! `<root>/<dedupe>/md/<id>.flist`, plain. Read-only, not purgeable.

use super::{CacheLayer, CacheStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use ssh2::Session;
use std::io::{Cursor, Read};
use std::net::TcpStream;
use std::path::PathBuf;

pub struct SftpCacheLayer {
    host: String,
    user: String,
    password: Option<String>,
    root: PathBuf,
    dedupe: String,
    name: String,
}

impl SftpCacheLayer {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: Option<String>,
        root: impl Into<PathBuf>,
        dedupe: impl Into<String>,
    ) -> Self {
        let host = host.into();
        SftpCacheLayer {
            name: format!("sftp:{host}"),
            host,
            user: user.into(),
            password,
            root: root.into(),
            dedupe: dedupe.into(),
        }
    }

    fn connect(&self) -> FsResult<Session> {
        let tcp = TcpStream::connect(&self.host)?;
        let mut sess = Session::new().map_err(|e| FsError::Io(std::io::Error::other(e)))?;
        sess.set_tcp_stream(tcp);
        sess.handshake().map_err(|e| FsError::Io(std::io::Error::other(e)))?;
        if let Some(pw) = &self.password {
            sess.userauth_password(&self.user, pw)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;
        } else {
            sess.userauth_agent(&self.user)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;
        }
        Ok(sess)
    }

    fn clone_conn_fields(&self) -> (String, String, Option<String>, PathBuf, String) {
        (
            self.host.clone(),
            self.user.clone(),
            self.password.clone(),
            self.root.clone(),
            self.dedupe.clone(),
        )
    }
}

#[async_trait]
impl CacheLayer for SftpCacheLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, hash: &str) -> FsResult<CacheStream> {
        let (host, user, password, root, dedupe) = self.clone_conn_fields();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || -> FsResult<CacheStream> {
            let layer = SftpCacheLayer {
                name: String::new(),
                host,
                user,
                password,
                root,
                dedupe,
            };
            let sess = layer.connect()?;
            let sftp = sess.sftp().map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            let path = layer.root.join(&layer.dedupe).join(format!("{hash}.bro"));
            let mut remote = sftp.open(&path).map_err(|_| FsError::NoEntry)?;
            let mut compressed = Vec::new();
            remote
                .read_to_end(&mut compressed)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;

            let mut decoded = Vec::new();
            brotli::BrotliDecompress(&mut Cursor::new(compressed), &mut decoded)
                .map_err(|e| FsError::Corrupt(e.to_string()))?;
            Ok(Box::new(Cursor::new(decoded)))
        })
        .await
        .map_err(|e| FsError::Io(std::io::Error::other(e)))?
    }

    async fn get_meta(&self, id: &str) -> FsResult<Vec<String>> {
        let (host, user, password, root, dedupe) = self.clone_conn_fields();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> FsResult<Vec<String>> {
            let layer = SftpCacheLayer {
                name: String::new(),
                host,
                user,
                password,
                root,
                dedupe,
            };
            let sess = layer.connect()?;
            let sftp = sess.sftp().map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            let path = layer.root.join(&layer.dedupe).join("md").join(format!("{id}.flist"));
            let mut remote = sftp.open(&path).map_err(|_| FsError::NoEntry)?;
            let mut text = String::new();
            remote
                .read_to_string(&mut text)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            Ok(text.lines().map(str::to_string).collect())
        })
        .await
        .map_err(|e| FsError::Io(std::io::Error::other(e)))?
    }

    async fn exists(&self, hash: &str) -> bool {
        let (host, user, password, root, dedupe) = self.clone_conn_fields();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || -> bool {
            let layer = SftpCacheLayer {
                name: String::new(),
                host,
                user,
                password,
                root,
                dedupe,
            };
            let Ok(sess) = layer.connect() else {
                return false;
            };
            let Ok(sftp) = sess.sftp() else {
                return false;
            };
            let path = layer.root.join(&layer.dedupe).join(format!("{hash}.bro"));
            sftp.stat(&path).is_ok()
        })
        .await
        .unwrap_or(false)
    }
}
