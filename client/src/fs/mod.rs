//! Root of the FUSE filesystem implementation.
//!
//! `RemoteFS` is the mount's state: an inode table over backend-relative
//! paths, the open-file table, and `Shared` — the composed `fs-core`
//! collaborators (meta store, cache manager, object store, change tracker,
//! tlog, populate guard) every dispatch function needs. `FsWrapper` wraps
//! it behind a mutex and implements `fuser::Filesystem`, forwarding each
//! kernel call to the matching submodule.
//!
//! Every operation runs on its own thread (`fuser` dispatches this way);
//! `fs-core`'s pipeline is async, so `Shared::block_on` drives it to
//! completion on that same thread via a shared Tokio runtime, mirroring the
//! teacher's original `runtime: tokio::runtime::Runtime` field.

mod attr;
mod attr_cache;
mod create;
mod delete;
mod lookup;
mod open;
mod rename;
mod statfs;
mod xattr;

use fs_core::cache::CacheManager;
use fs_core::config::{Backend, Mode};
use fs_core::meta::MetaStore;
use fs_core::populate::PopulateGuard;
use fs_core::store::ObjectStore;
use fs_core::tlog::TLog;
use fs_core::tracker::{ChangeTracker, MapTracker, SidecarTracker};
use fuser::{FileType, Filesystem};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use attr_cache::AttrCache;

/// Either change-tracker variant backend config selects, per spec.md §3.
/// `SidecarTracker` borrows its `MetaStore` per call rather than owning an
/// `Arc`, since it's a stateless view over the sidecar bits — constructed
/// fresh each time it's consulted instead of held long-lived.
pub enum TrackerHandle {
    Map(MapTracker),
    Sidecar,
}

impl TrackerHandle {
    pub fn touch(&self, meta_store: &dyn MetaStore, backend_root: &Path, path: &Path) {
        match self {
            TrackerHandle::Map(t) => t.touch(path),
            TrackerHandle::Sidecar => SidecarTracker::new(meta_store, backend_root).touch(path),
        }
    }

    pub fn close(&self, meta_store: &dyn MetaStore, backend_root: &Path, path: &Path) {
        match self {
            TrackerHandle::Map(t) => t.close(path),
            TrackerHandle::Sidecar => SidecarTracker::new(meta_store, backend_root).close(path),
        }
    }

    pub fn ready_iter(&self, meta_store: &dyn MetaStore, backend_root: &Path) -> Vec<PathBuf> {
        match self {
            TrackerHandle::Map(t) => t.ready_iter(),
            TrackerHandle::Sidecar => SidecarTracker::new(meta_store, backend_root).ready_iter(),
        }
    }

    pub fn forget(&self, meta_store: &dyn MetaStore, backend_root: &Path, path: &Path) {
        match self {
            TrackerHandle::Map(t) => t.forget(path),
            TrackerHandle::Sidecar => SidecarTracker::new(meta_store, backend_root).forget(path),
        }
    }
}

/// The `fs-core` collaborators a mount composes at startup, shared by the
/// FUSE dispatch thread pool and the background cron tasks.
pub struct Shared {
    pub backend: Backend,
    pub mode: Mode,
    pub meta_store: Arc<dyn MetaStore>,
    pub cache: Arc<CacheManager>,
    pub object_store: Arc<dyn ObjectStore>,
    pub tracker: Arc<TrackerHandle>,
    pub tlog: Arc<TLog>,
    pub populate_guard: Arc<PopulateGuard>,
    pub runtime: tokio::runtime::Handle,
    pub kernel_attr_ttl: Duration,
    pub kernel_entry_ttl: Duration,
}

impl Shared {
    /// Brings `rel` (backend-relative, no leading `/`) into existence on
    /// the backend, blocking the calling FUSE thread until the populate
    /// pipeline completes. A no-op if the path already exists — every
    /// dispatch function that needs materialized data calls this
    /// unconditionally rather than the "try, catch NoEntry, retry"
    /// two-step of spec.md §4.7, since `populate` already short-circuits
    /// on an existing path and the effect is the same.
    pub fn ensure_populated(&self, rel: &Path) -> fs_core::FsResult<()> {
        // `fuser` dispatches each request on its own plain OS thread, not a
        // Tokio worker, so there's no surrounding runtime context to yield
        // to — `Handle::block_on` (not `block_in_place`) is the right way
        // to drive the pipeline's async future to completion from here.
        let target = logical_target(rel);
        self.runtime.block_on(fs_core::populate::populate(
            &self.populate_guard,
            self.meta_store.as_ref(),
            &self.cache,
            &self.backend,
            &target,
        ))
    }

    pub fn backend_path(&self, rel: &Path) -> PathBuf {
        self.backend.path.join(rel)
    }

    pub fn check_writable(&self) -> fs_core::FsResult<()> {
        if self.mode == Mode::Ro {
            Err(fs_core::FsError::Permission)
        } else {
            Ok(())
        }
    }

    pub fn is_overlay(&self) -> bool {
        self.mode == Mode::Ol
    }
}

/// `/`-delimited, leading-slash logical path `populate()` expects.
pub fn logical_target(rel: &Path) -> String {
    if rel.as_os_str().is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rel.to_string_lossy())
    }
}

pub struct OpenFile {
    pub rel_path: PathBuf,
    pub file: std::fs::File,
    pub writable: bool,
}

pub struct OpenDir {
    pub rel_path: PathBuf,
}

/// Mount state: the inode table plus the shared `fs-core` collaborators.
/// Inode 1 is always the mount root (`rel_path == ""`).
pub struct RemoteFS {
    pub(crate) shared: Shared,
    pub(crate) inode_to_path: HashMap<u64, PathBuf>,
    pub(crate) path_to_inode: HashMap<PathBuf, u64>,
    pub(crate) next_inode: u64,
    pub(crate) attr_cache: AttrCache,
    pub(crate) open_files: HashMap<u64, OpenFile>,
    pub(crate) open_dirs: HashMap<u64, OpenDir>,
    pub(crate) next_fh: u64,
}

impl RemoteFS {
    pub fn new(shared: Shared) -> Self {
        let attr_ttl = shared.kernel_attr_ttl;
        let mut fs = RemoteFS {
            shared,
            inode_to_path: HashMap::new(),
            path_to_inode: HashMap::new(),
            next_inode: 2,
            attr_cache: AttrCache::new(attr_ttl),
            open_files: HashMap::new(),
            open_dirs: HashMap::new(),
            next_fh: 1,
        };
        fs.inode_to_path.insert(1, PathBuf::new());
        fs.path_to_inode.insert(PathBuf::new(), 1);
        fs
    }

    /// Resolves an inode to its backend-relative path, or `ENOENT` if the
    /// kernel is asking about an inode we never handed out (dropped cache,
    /// stale handle across a remount).
    pub(crate) fn path_for(&self, ino: u64) -> Result<PathBuf, libc::c_int> {
        self.inode_to_path.get(&ino).cloned().ok_or(libc::ENOENT)
    }

    /// Interns `path`, reusing an existing inode if one is already mapped.
    pub(crate) fn inode_for(&mut self, path: &Path) -> u64 {
        if let Some(ino) = self.path_to_inode.get(path) {
            return *ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.inode_to_path.insert(ino, path.to_path_buf());
        self.path_to_inode.insert(path.to_path_buf(), ino);
        ino
    }

    pub(crate) fn alloc_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }
}

#[derive(Clone)]
pub struct FsWrapper(pub Arc<Mutex<RemoteFS>>);

fn kind_from_meta(md: &fs_core::meta::MetaData) -> FileType {
    use fs_core::manifest::FileKind;
    match md.filetype {
        FileKind::Directory => FileType::Directory,
        FileKind::Regular => FileType::RegularFile,
        FileKind::Symlink => FileType::Symlink,
        FileKind::Block => FileType::BlockDevice,
        FileKind::Char => FileType::CharDevice,
        FileKind::Fifo => FileType::NamedPipe,
        FileKind::Socket => FileType::Socket,
    }
}

impl Filesystem for FsWrapper {
    fn getattr(&mut self, req: &fuser::Request, ino: u64, reply: fuser::ReplyAttr) {
        let mut fs = self.0.lock().unwrap();
        attr::getattr(&mut fs, req, ino, reply);
    }

    fn setattr(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        ctime: Option<std::time::SystemTime>,
        fh: Option<u64>,
        crtime: Option<std::time::SystemTime>,
        chgtime: Option<std::time::SystemTime>,
        bkuptime: Option<std::time::SystemTime>,
        flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let mut fs = self.0.lock().unwrap();
        attr::setattr(
            &mut fs, req, ino, mode, uid, gid, size, atime, mtime, ctime, fh, crtime, chgtime,
            bkuptime, flags, reply,
        );
    }

    fn lookup(&mut self, req: &fuser::Request, parent: u64, name: &std::ffi::OsStr, reply: fuser::ReplyEntry) {
        let mut fs = self.0.lock().unwrap();
        lookup::lookup(&mut fs, req, parent, name, reply);
    }

    fn forget(&mut self, _req: &fuser::Request<'_>, _ino: u64, _nlookup: u64) {
        // Inodes are never reclaimed: the table is bounded by the mount's
        // manifest size, not by kernel lookup-count churn.
    }

    fn readlink(&mut self, req: &fuser::Request, ino: u64, reply: fuser::ReplyData) {
        let mut fs = self.0.lock().unwrap();
        lookup::readlink(&mut fs, req, ino, reply);
    }

    fn access(&mut self, req: &fuser::Request, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        lookup::access(&mut fs, req, ino, mask, reply);
    }

    fn opendir(&mut self, req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let mut fs = self.0.lock().unwrap();
        lookup::opendir(&mut fs, req, ino, flags, reply);
    }

    fn readdir(&mut self, req: &fuser::Request, ino: u64, fh: u64, offset: i64, reply: fuser::ReplyDirectory) {
        let mut fs = self.0.lock().unwrap();
        lookup::readdir(&mut fs, req, ino, fh, offset, reply);
    }

    fn releasedir(&mut self, req: &fuser::Request<'_>, ino: u64, fh: u64, flags: i32, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        lookup::releasedir(&mut fs, req, ino, fh, flags, reply);
    }

    fn fsyncdir(&mut self, req: &fuser::Request<'_>, ino: u64, fh: u64, datasync: bool, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        lookup::fsyncdir(&mut fs, req, ino, fh, datasync, reply);
    }

    fn read(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let mut fs = self.0.lock().unwrap();
        open::read(&mut fs, req, ino, fh, offset, size, flags, lock_owner, reply);
    }

    fn open(&mut self, req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let mut fs = self.0.lock().unwrap();
        open::open(&mut fs, req, ino, flags, reply);
    }

    fn write(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let mut fs = self.0.lock().unwrap();
        open::write(&mut fs, req, ino, fh, offset, data, write_flags, flags, lock_owner, reply);
    }

    fn release(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let mut fs = self.0.lock().unwrap();
        open::release(&mut fs, req, ino, fh, flags, lock_owner, flush, reply);
    }

    fn flush(&mut self, req: &fuser::Request<'_>, ino: u64, fh: u64, lock_owner: u64, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        open::flush(&mut fs, req, ino, fh, lock_owner, reply);
    }

    fn fsync(&mut self, req: &fuser::Request<'_>, ino: u64, fh: u64, datasync: bool, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        open::fsync(&mut fs, req, ino, fh, datasync, reply);
    }

    fn create(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let mut fs = self.0.lock().unwrap();
        create::create(&mut fs, req, parent, name, mode, umask, flags, reply);
    }

    fn mkdir(&mut self, req: &fuser::Request<'_>, parent: u64, name: &std::ffi::OsStr, mode: u32, umask: u32, reply: fuser::ReplyEntry) {
        let mut fs = self.0.lock().unwrap();
        create::mkdir(&mut fs, req, parent, name, mode, umask, reply);
    }

    fn mknod(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        let mut fs = self.0.lock().unwrap();
        create::mknod(&mut fs, req, parent, name, mode, umask, rdev, reply);
    }

    fn symlink(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        link_name: &std::ffi::OsStr,
        target: &std::path::Path,
        reply: fuser::ReplyEntry,
    ) {
        let mut fs = self.0.lock().unwrap();
        create::symlink(&mut fs, req, parent, link_name, target, reply);
    }

    fn unlink(&mut self, req: &fuser::Request<'_>, parent: u64, name: &std::ffi::OsStr, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        delete::unlink(&mut fs, req, parent, name, reply);
    }

    fn rmdir(&mut self, req: &fuser::Request<'_>, parent: u64, name: &std::ffi::OsStr, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        delete::rmdir(&mut fs, req, parent, name, reply);
    }

    fn rename(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        newparent: u64,
        newname: &std::ffi::OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let mut fs = self.0.lock().unwrap();
        rename::rename(&mut fs, req, parent, name, newparent, newname, flags, reply);
    }

    fn link(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let mut fs = self.0.lock().unwrap();
        rename::link(&mut fs, req, ino, newparent, newname, reply);
    }

    fn statfs(&mut self, req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        let mut fs = self.0.lock().unwrap();
        statfs::statfs(&mut fs, req, ino, reply);
    }

    fn setxattr(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        name: &std::ffi::OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let mut fs = self.0.lock().unwrap();
        xattr::setxattr(&mut fs, req, ino, name, value, flags, position, reply);
    }

    fn getxattr(&mut self, req: &fuser::Request<'_>, ino: u64, name: &std::ffi::OsStr, size: u32, reply: fuser::ReplyXattr) {
        let mut fs = self.0.lock().unwrap();
        xattr::getxattr(&mut fs, req, ino, name, size, reply);
    }

    fn listxattr(&mut self, req: &fuser::Request<'_>, ino: u64, size: u32, reply: fuser::ReplyXattr) {
        let mut fs = self.0.lock().unwrap();
        xattr::listxattr(&mut fs, req, ino, size, reply);
    }

    fn removexattr(&mut self, req: &fuser::Request<'_>, ino: u64, name: &std::ffi::OsStr, reply: fuser::ReplyEmpty) {
        let mut fs = self.0.lock().unwrap();
        xattr::removexattr(&mut fs, req, ino, name, reply);
    }
}
