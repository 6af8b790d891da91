//! SFTP object-store transport, over `ssh2` — the ecosystem's standard
//! libssh2 binding and the closest analog to `original_source`'s SFTP
//! stor/cache variants. Blobs live at `<root>/store/<namespace>/<hash>`.

use super::{ObjectStore, ObjectStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use ssh2::Session;
use std::io::{Cursor, Read};
use std::net::TcpStream;
use std::path::PathBuf;

pub struct SftpStore {
    host: String,
    user: String,
    password: Option<String>,
    root: PathBuf,
}

impl SftpStore {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: Option<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password,
            root: root.into(),
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
}

#[async_trait]
impl ObjectStore for SftpStore {
    async fn get(&self, namespace: &str, hash: &str) -> FsResult<ObjectStream> {
        let host = self.host.clone();
        let user = self.user.clone();
        let password = self.password.clone();
        let root = self.root.clone();
        let namespace = namespace.to_string();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || -> FsResult<ObjectStream> {
            let store = SftpStore {
                host,
                user,
                password,
                root,
            };
            let sess = store.connect()?;
            let sftp = sess.sftp().map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            let path = store.root.join("store").join(&namespace).join(&hash);
            let mut remote = sftp
                .open(&path)
                .map_err(|_| FsError::NoEntry)?;
            let mut buf = Vec::new();
            remote
                .read_to_end(&mut buf)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            Ok(Box::new(Cursor::new(buf)))
        })
        .await
        .map_err(|e| FsError::Io(std::io::Error::other(e)))?
    }

    async fn put(&self, namespace: &str, body: Vec<u8>) -> FsResult<()> {
        let host = self.host.clone();
        let user = self.user.clone();
        let password = self.password.clone();
        let root = self.root.clone();
        let namespace = namespace.to_string();

        tokio::task::spawn_blocking(move || -> FsResult<()> {
            let store = SftpStore {
                host,
                user,
                password,
                root,
            };
            let sess = store.connect()?;
            let sftp = sess.sftp().map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            let dir = store.root.join("store").join(&namespace);
            let _ = sftp.mkdir(&dir, 0o755);
            let hash = crate::crypto::md5_hex_of(Cursor::new(&body))?;
            let path = dir.join(&hash);
            use std::io::Write;
            let mut remote = sftp
                .create(&path)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            remote
                .write_all(&body)
                .map_err(|e| FsError::Io(std::io::Error::other(e)))?;
            Ok(())
        })
        .await
        .map_err(|e| FsError::Io(std::io::Error::other(e)))?
    }
}
