//! Local filesystem cache layer — spec.md §4.3's local-FS row: the only
//! layer that is both writable (`dedupe`) and purgeable. Files live under
//! `<root>/<dedupe>/files/<hash>`; manifests under
//! `<root>/<dedupe>/md/<id>.flist`.

use super::{CacheLayer, CacheStream};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::{copy, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

pub struct FsCacheLayer {
    root: PathBuf,
    dedupe: String,
    name: String,
}

impl FsCacheLayer {
    pub fn new(root: impl Into<PathBuf>, dedupe: impl Into<String>) -> Self {
        let root = root.into();
        FsCacheLayer {
            name: format!("fs:{}", root.display()),
            root,
            dedupe: dedupe.into(),
        }
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join(&self.dedupe).join("files")
    }

    fn file_path(&self, hash: &str) -> PathBuf {
        self.files_dir().join(hash)
    }

    fn md_path(&self, id: &str) -> PathBuf {
        self.root.join(&self.dedupe).join("md").join(format!("{id}.flist"))
    }
}

#[async_trait]
impl CacheLayer for FsCacheLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, hash: &str) -> FsResult<CacheStream> {
        let path = self.file_path(hash);
        let f = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NoEntry
            } else {
                FsError::Io(e)
            }
        })?;
        Ok(Box::new(f))
    }

    async fn get_meta(&self, id: &str) -> FsResult<Vec<String>> {
        let path = self.md_path(id);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NoEntry
            } else {
                FsError::Io(e)
            }
        })?;
        Ok(contents.lines().map(str::to_string).collect())
    }

    async fn exists(&self, hash: &str) -> bool {
        self.file_path(hash).exists()
    }

    fn is_writable(&self) -> bool {
        true
    }

    /// `mkdir -p`, create, copy from the (already rewound) source. Idempotent:
    /// a no-op if the destination already exists; a failed copy removes the
    /// partial destination — spec.md §4.3.
    async fn dedupe(&self, hash: &str, mut stream: CacheStream) -> FsResult<()> {
        let dest = self.file_path(hash);
        if dest.exists() {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        stream.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(stream);
        let mut out = match File::create(&dest) {
            Ok(f) => f,
            Err(e) => return Err(FsError::Io(e)),
        };
        if let Err(e) = copy(&mut reader, &mut out) {
            let _ = std::fs::remove_file(&dest);
            return Err(FsError::Io(e));
        }
        Ok(())
    }

    fn is_purgeable(&self) -> bool {
        true
    }

    async fn purge(&self) -> FsResult<()> {
        let dir = self.root.join(&self.dedupe);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir)?;
        Ok(())
    }
}
