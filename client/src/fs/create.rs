//! `Create`, `Mkdir`, `Mknod`, `Symlink` — spec.md §4.7.
//!
//! Every one of these makes a brand-new backend entry and its own sidecar
//! in the same step: the content already exists locally, so the sidecar
//! is written `modified` (spec.md §4.5's state bits) straight away rather
//! than `initial`, marking the path for the next upload cycle without a
//! trip through the populate pipeline.

use super::attr::resolve_attr;
use super::{OpenFile, RemoteFS};
use fs_core::manifest::FileKind;
use fs_core::meta::{MetaData, MetaState, STATE_MODIFIED};
use fuser::{ReplyCreate, ReplyEntry, Request};
use std::ffi::OsStr;
use std::path::Path;

fn new_meta(req: &Request<'_>, filetype: FileKind, mode: u32, extended: String) -> MetaData {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    MetaData {
        hash: String::new(),
        size: 0,
        uname: String::new(),
        uid: req.uid(),
        gname: String::new(),
        gid: req.gid(),
        permissions: mode & 0o7777,
        filetype,
        ctime: now,
        mtime: now,
        extended,
        dev_major: 0,
        dev_minor: 0,
        user_key: String::new(),
        store_key: String::new(),
        state: MetaState(STATE_MODIFIED),
    }
}

fn parent_path(fs: &mut RemoteFS, parent: u64, name: &OsStr) -> Result<std::path::PathBuf, i32> {
    let parent_rel = fs.path_for(parent)?;
    Ok(parent_rel.join(name))
}

pub fn create(
    fs: &mut RemoteFS,
    req: &Request<'_>,
    parent: u64,
    name: &OsStr,
    mode: u32,
    umask: u32,
    flags: i32,
    reply: ReplyCreate,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let rel = match parent_path(fs, parent, name) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    if let Err(e) = fs.shared.ensure_populated(&rel.parent().unwrap_or(Path::new("")).to_path_buf()) {
        reply.error(e.to_errno());
        return;
    }
    let backend_path = fs.shared.backend_path(&rel);
    let file_mode = mode & !umask & 0o7777;

    let file = match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&backend_path)
    {
        Ok(f) => f,
        Err(e) => {
            reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            return;
        }
    };
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&backend_path, std::fs::Permissions::from_mode(file_mode));
    }

    let meta = new_meta(req, FileKind::Regular, file_mode, String::new());
    if let Err(e) = fs.shared.meta_store.save(&backend_path, &meta) {
        let _ = std::fs::remove_file(&backend_path);
        reply.error(e.to_errno());
        return;
    }
    fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &rel);

    let ino = fs.inode_for(&rel);
    let attr = match resolve_attr(fs, ino, &rel) {
        Ok(a) => a,
        Err(e) => {
            reply.error(e.to_errno());
            return;
        }
    };
    fs.attr_cache.put(ino, attr);

    let fh = fs.alloc_fh();
    // The backend fd was opened read-write regardless of the request's
    // flags; what matters for tracker bookkeeping is whether the caller
    // intends to write through this handle.
    let writable = flags & libc::O_ACCMODE != libc::O_RDONLY;
    fs.open_files.insert(
        fh,
        OpenFile {
            rel_path: rel,
            file,
            writable,
        },
    );

    reply.created(&fs.shared.kernel_attr_ttl, &attr, 0, fh, 0);
}

pub fn mkdir(
    fs: &mut RemoteFS,
    req: &Request<'_>,
    parent: u64,
    name: &OsStr,
    mode: u32,
    umask: u32,
    reply: ReplyEntry,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let rel = match parent_path(fs, parent, name) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    if let Err(e) = fs.shared.ensure_populated(&rel.parent().unwrap_or(Path::new("")).to_path_buf()) {
        reply.error(e.to_errno());
        return;
    }
    let backend_path = fs.shared.backend_path(&rel);
    let dir_mode = mode & !umask & 0o7777;

    if let Err(e) = std::fs::create_dir(&backend_path) {
        reply.error(e.raw_os_error().unwrap_or(libc::EIO));
        return;
    }
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&backend_path, std::fs::Permissions::from_mode(dir_mode));
    }

    let meta = new_meta(req, FileKind::Directory, dir_mode, String::new());
    if let Err(e) = fs.shared.meta_store.save(&backend_path, &meta) {
        let _ = std::fs::remove_dir(&backend_path);
        reply.error(e.to_errno());
        return;
    }
    fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &rel);

    let ino = fs.inode_for(&rel);
    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            fs.attr_cache.put(ino, attr);
            reply.entry(&fs.shared.kernel_entry_ttl, &attr, 0);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}

pub fn mknod(
    fs: &mut RemoteFS,
    req: &Request<'_>,
    parent: u64,
    name: &OsStr,
    mode: u32,
    umask: u32,
    rdev: u32,
    reply: ReplyEntry,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let rel = match parent_path(fs, parent, name) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    if let Err(e) = fs.shared.ensure_populated(&rel.parent().unwrap_or(Path::new("")).to_path_buf()) {
        reply.error(e.to_errno());
        return;
    }
    let backend_path = fs.shared.backend_path(&rel);
    let node_mode = mode & !umask;

    let filetype = match mode & libc::S_IFMT {
        libc::S_IFBLK => FileKind::Block,
        libc::S_IFCHR => FileKind::Char,
        libc::S_IFIFO => FileKind::Fifo,
        libc::S_IFSOCK => FileKind::Socket,
        _ => FileKind::Regular,
    };

    let rc = match std::ffi::CString::new(backend_path.as_os_str().as_encoded_bytes()) {
        Ok(c_path) => unsafe { libc::mknod(c_path.as_ptr(), node_mode, rdev as libc::dev_t) },
        Err(_) => {
            reply.error(libc::EINVAL);
            return;
        }
    };
    if rc != 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        return;
    }

    let mut meta = new_meta(req, filetype, node_mode & 0o7777, String::new());
    meta.dev_major = (rdev >> 8) & 0xfff;
    meta.dev_minor = rdev & 0xff;
    if let Err(e) = fs.shared.meta_store.save(&backend_path, &meta) {
        let _ = std::fs::remove_file(&backend_path);
        reply.error(e.to_errno());
        return;
    }
    fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &rel);

    let ino = fs.inode_for(&rel);
    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            fs.attr_cache.put(ino, attr);
            reply.entry(&fs.shared.kernel_entry_ttl, &attr, 0);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}

pub fn symlink(
    fs: &mut RemoteFS,
    req: &Request<'_>,
    parent: u64,
    link_name: &OsStr,
    target: &Path,
    reply: ReplyEntry,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let rel = match parent_path(fs, parent, link_name) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    if let Err(e) = fs.shared.ensure_populated(&rel.parent().unwrap_or(Path::new("")).to_path_buf()) {
        reply.error(e.to_errno());
        return;
    }
    let backend_path = fs.shared.backend_path(&rel);

    if let Err(e) = std::os::unix::fs::symlink(target, &backend_path) {
        reply.error(e.raw_os_error().unwrap_or(libc::EIO));
        return;
    }

    let meta = new_meta(req, FileKind::Symlink, 0o777, target.to_string_lossy().into_owned());
    if let Err(e) = fs.shared.meta_store.save(&backend_path, &meta) {
        let _ = std::fs::remove_file(&backend_path);
        reply.error(e.to_errno());
        return;
    }
    fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &rel);

    let ino = fs.inode_for(&rel);
    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            fs.attr_cache.put(ino, attr);
            reply.entry(&fs.shared.kernel_entry_ttl, &attr, 0);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}
