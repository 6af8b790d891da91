//! tlog — spec.md §6: a rotating, line-oriented upload journal.
//! `<absolute_path>|<hex_md5>|<unix_seconds>`, rotating at 5 MiB with one
//! retained backup. Named in spec.md §3/§6 but undetailed; implemented
//! with the same "writer that owns rename-on-rotate" shape as
//! `tracing-appender`'s rolling file appender, adapted to a byte-count
//! trigger instead of a time schedule since the cap here is a size, not a
//! calendar period.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MAX_BYTES: u64 = 5 * 1024 * 1024;

pub struct TLog {
    path: PathBuf,
    inner: Mutex<TLogInner>,
}

struct TLogInner {
    file: File,
    written: u64,
}

impl TLog {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(TLog {
            path,
            inner: Mutex::new(TLogInner { file, written }),
        })
    }

    /// Appends `<path>|<hex_md5>|<unix_seconds>`, rotating first if the
    /// file has reached the byte cap.
    pub fn append(&self, path: &str, hex_md5: &str, unix_seconds: i64) -> std::io::Result<()> {
        let line = format!("{path}|{hex_md5}|{unix_seconds}\n");
        let mut inner = self.inner.lock().unwrap();

        if inner.written + line.len() as u64 > MAX_BYTES {
            self.rotate(&mut inner)?;
        }

        inner.file.write_all(line.as_bytes())?;
        inner.written += line.len() as u64;
        Ok(())
    }

    fn rotate(&self, inner: &mut TLogInner) -> std::io::Result<()> {
        let backup = backup_path(&self.path);
        let _ = std::fs::remove_file(&backup);
        // Renaming a file out from under an open fd is well-defined on the
        // POSIX hosts this tlog runs on: the fd keeps writing to the
        // unlinked-from-this-path inode until we swap it below.
        std::fs::rename(&self.path, &backup)?;
        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        inner.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".1");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("t.log");
        let log = TLog::open(&log_path).unwrap();
        log.append("/a/b", "deadbeef", 1000).unwrap();
        log.append("/c/d", "cafebabe", 1001).unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(
            contents,
            "/a/b|deadbeef|1000\n/c/d|cafebabe|1001\n"
        );
    }

    #[test]
    fn rotates_past_cap() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("t.log");
        let log = TLog::open(&log_path).unwrap();
        {
            let mut inner = log.inner.lock().unwrap();
            inner.written = MAX_BYTES;
        }
        log.append("/a/b", "deadbeef", 1000).unwrap();
        assert!(backup_path(&log_path).exists());
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents, "/a/b|deadbeef|1000\n");
    }
}
