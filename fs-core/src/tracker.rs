//! Change tracker — spec.md §3/§4.7's upload-readiness bookkeeping.
//! Grounded in `original_source/tracker/tracker.go`.

use crate::error::FsResult;
use crate::meta::{MetaState, MetaStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 15 minutes — `original_source/tracker/tracker.go`'s `FileTimeout`.
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub trait ChangeTracker: Send + Sync {
    /// Marks `path` dirty, refreshing its last-touch time.
    fn touch(&self, path: &Path);

    /// Marks the final handle on `path` closed.
    fn close(&self, path: &Path);

    /// Paths ready to upload: either closed, or idle past the timeout.
    fn ready_iter(&self) -> Vec<PathBuf>;

    /// Drops `path` from tracking — called after a successful upload.
    fn forget(&self, path: &Path);
}

struct TouchState {
    last_touch: Instant,
    closed: bool,
}

/// In-memory mutex-guarded map variant — the original's default.
pub struct MapTracker {
    state: Mutex<HashMap<PathBuf, TouchState>>,
    timeout: Duration,
}

impl MapTracker {
    pub fn new(timeout: Duration) -> Self {
        MapTracker {
            state: Mutex::new(HashMap::new()),
            timeout,
        }
    }
}

impl Default for MapTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_TIMEOUT)
    }
}

impl ChangeTracker for MapTracker {
    fn touch(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(path.to_path_buf()).or_insert(TouchState {
            last_touch: Instant::now(),
            closed: false,
        });
        // Tracker monotonicity (spec.md §5): a touch never moves
        // last_touch backward, and a fresh touch always overrides a
        // previously-closed state — a reopened file is dirty again.
        entry.last_touch = Instant::now();
        entry.closed = false;
    }

    fn close(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.get_mut(path) {
            entry.closed = true;
        }
    }

    fn ready_iter(&self) -> Vec<PathBuf> {
        let state = self.state.lock().unwrap();
        let now = Instant::now();
        state
            .iter()
            .filter(|(_, s)| s.closed || now.duration_since(s.last_touch) > self.timeout)
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn forget(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.remove(path);
    }
}

/// Alternate variant named in spec.md §3: keeps no in-memory map, instead
/// flipping the sidecar's `modified` bit on every touch. "Ready" is then
/// simply "every path whose sidecar is `modified`" — the meta store is the
/// only source of truth, at the cost of a directory walk to enumerate
/// ready paths instead of an O(1) map scan.
pub struct SidecarTracker<'a> {
    meta_store: &'a dyn MetaStore,
    backend_root: PathBuf,
}

impl<'a> SidecarTracker<'a> {
    pub fn new(meta_store: &'a dyn MetaStore, backend_root: impl Into<PathBuf>) -> Self {
        SidecarTracker {
            meta_store,
            backend_root: backend_root.into(),
        }
    }

    fn walk_modified(&self, dir: &Path, out: &mut Vec<PathBuf>) -> FsResult<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_modified(&path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("meta") {
                continue;
            }
            if let Some(state) = self.meta_store.stat(&path)? {
                if state.modified() {
                    out.push(path);
                }
            }
        }
        Ok(())
    }
}

impl ChangeTracker for SidecarTracker<'_> {
    fn touch(&self, path: &Path) {
        if let Ok(Some(mut state)) = self.meta_store.stat(path) {
            state.set_modified();
            let _ = self.meta_store.set_stat(path, state);
        } else {
            let mut state = MetaState(0);
            state.set_modified();
            let _ = self.meta_store.set_stat(path, state);
        }
    }

    fn close(&self, _path: &Path) {
        // No in-memory state to flip; readiness is derived purely from the
        // sidecar's modified bit, which `touch` already set.
    }

    fn ready_iter(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let _ = self.walk_modified(&self.backend_root, &mut out);
        out
    }

    fn forget(&self, path: &Path) {
        if let Ok(Some(mut state)) = self.meta_store.stat(path) {
            state.clear();
            let _ = self.meta_store.set_stat(path, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn touch_then_close_is_ready() {
        let tracker = MapTracker::new(Duration::from_secs(900));
        let p = PathBuf::from("/a/b");
        tracker.touch(&p);
        assert!(tracker.ready_iter().is_empty());
        tracker.close(&p);
        assert_eq!(tracker.ready_iter(), vec![p]);
    }

    #[test]
    fn idle_past_timeout_is_ready() {
        let tracker = MapTracker::new(Duration::from_millis(1));
        let p = PathBuf::from("/a/b");
        tracker.touch(&p);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.ready_iter(), vec![p]);
    }

    #[test]
    fn forget_removes_entry() {
        let tracker = MapTracker::default();
        let p = PathBuf::from("/a/b");
        tracker.touch(&p);
        tracker.close(&p);
        tracker.forget(&p);
        assert!(tracker.ready_iter().is_empty());
    }
}
