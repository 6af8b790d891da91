//! `GetAttr`/`SetAttr` — spec.md §4.7.
//!
//! `getattr`: lstat the backend; if absent but a sidecar exists, synthesize
//! attributes from it (unless the sidecar is tombstoned); otherwise
//! `NoEntry`. No populate/download happens here — only `Open` materializes
//! file content, per spec.md §4.6's "on first access" trigger, which
//! `getattr` alone must not be.

use super::{kind_from_meta, RemoteFS};
use fs_core::meta::MetaData;
use fuser::{FileAttr, FileType, ReplyAttr, Request, TimeOrNow};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(super) fn attr_from_metadata(ino: u64, md: &std::fs::Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: md.size(),
        blocks: md.blocks(),
        atime: UNIX_EPOCH + Duration::from_secs(md.atime().max(0) as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(md.mtime().max(0) as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(md.ctime().max(0) as u64),
        crtime: UNIX_EPOCH,
        kind: file_type_from_mode(md.mode()),
        perm: (md.mode() & 0o7777) as u16,
        nlink: md.nlink() as u32,
        uid: md.uid(),
        gid: md.gid(),
        rdev: md.rdev() as u32,
        flags: 0,
        blksize: md.blksize() as u32,
    }
}

pub(super) fn attr_from_sidecar(ino: u64, md: &MetaData) -> FileAttr {
    FileAttr {
        ino,
        size: md.size,
        blocks: md.size.div_ceil(512),
        atime: UNIX_EPOCH + Duration::from_secs(md.mtime.max(0) as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(md.mtime.max(0) as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(md.ctime.max(0) as u64),
        crtime: UNIX_EPOCH,
        kind: kind_from_meta(md),
        perm: (md.permissions & 0o7777) as u16,
        nlink: if md.filetype == fs_core::manifest::FileKind::Directory { 2 } else { 1 },
        uid: md.uid,
        gid: md.gid,
        rdev: if md.filetype.is_special_device() { md.rdev() } else { 0 },
        flags: 0,
        blksize: 4096,
    }
}

fn file_type_from_mode(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Resolves attributes for a backend-relative path, per spec.md §4.7's
/// `GetAttr` procedure, without touching the populate pipeline.
pub(super) fn resolve_attr(fs: &RemoteFS, ino: u64, rel: &Path) -> fs_core::FsResult<FileAttr> {
    let backend_path = fs.shared.backend_path(rel);

    if let Ok(md) = std::fs::symlink_metadata(&backend_path) {
        return Ok(attr_from_metadata(ino, &md));
    }

    match fs.shared.meta_store.get(&backend_path)? {
        Some(sidecar) => {
            if sidecar.state.deleted() {
                Err(fs_core::FsError::NoEntry)
            } else {
                Ok(attr_from_sidecar(ino, &sidecar))
            }
        }
        None => Err(fs_core::FsError::NoEntry),
    }
}

pub fn getattr(fs: &mut RemoteFS, _req: &Request, ino: u64, reply: ReplyAttr) {
    if let Some(attr) = fs.attr_cache.get(ino) {
        reply.attr(&fs.shared.kernel_attr_ttl, &attr);
        return;
    }

    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            fs.attr_cache.put(ino, attr);
            reply.attr(&fs.shared.kernel_attr_ttl, &attr);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}

/// `SetAttr` covers `chmod`/`chown`/`truncate`/`utimens` — all of them
/// passthrough to the backend file once it's been brought into existence,
/// per spec.md §4.7's lazy-materialization pattern for those ops.
#[allow(clippy::too_many_arguments)]
pub fn setattr(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    ino: u64,
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: Option<TimeOrNow>,
    mtime: Option<TimeOrNow>,
    _ctime: Option<SystemTime>,
    _fh: Option<u64>,
    _crtime: Option<SystemTime>,
    _chgtime: Option<SystemTime>,
    _bkuptime: Option<SystemTime>,
    _flags: Option<u32>,
    reply: ReplyAttr,
) {
    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    if mode.is_some() || uid.is_some() || gid.is_some() || size.is_some() || atime.is_some() || mtime.is_some() {
        if let Err(e) = fs.shared.check_writable() {
            reply.error(e.to_errno());
            return;
        }
        if let Err(e) = fs.shared.ensure_populated(&rel) {
            reply.error(e.to_errno());
            return;
        }
    }

    let backend_path = fs.shared.backend_path(&rel);

    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(&backend_path, std::fs::Permissions::from_mode(mode)) {
            reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            return;
        }
    }

    if uid.is_some() || gid.is_some() {
        if let Ok(c_path) = std::ffi::CString::new(backend_path.as_os_str().as_encoded_bytes()) {
            let rc = unsafe {
                libc::chown(
                    c_path.as_ptr(),
                    uid.unwrap_or(u32::MAX),
                    gid.unwrap_or(u32::MAX),
                )
            };
            if rc != 0 {
                reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
                return;
            }
        }
    }

    if let Some(new_size) = size {
        if let Err(e) = std::fs::OpenOptions::new()
            .write(true)
            .open(&backend_path)
            .and_then(|f| f.set_len(new_size))
        {
            reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            return;
        }
    }

    if atime.is_some() || mtime.is_some() {
        let resolve = |t: Option<TimeOrNow>, fallback: libc::timespec| match t {
            Some(TimeOrNow::SpecificTime(st)) => libc::timespec {
                tv_sec: st.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0),
                tv_nsec: 0,
            },
            Some(TimeOrNow::Now) => libc::timespec {
                tv_sec: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0),
                tv_nsec: 0,
            },
            None => fallback,
        };
        let omit = libc::timespec { tv_sec: 0, tv_nsec: libc::UTIME_OMIT };
        let specs = [resolve(atime, omit), resolve(mtime, omit)];
        if let Ok(c_path) = std::ffi::CString::new(backend_path.as_os_str().as_encoded_bytes()) {
            unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), specs.as_ptr(), 0) };
        }
    }

    if mode.is_some() || size.is_some() {
        fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &rel);
    }

    fs.attr_cache.invalidate(ino);
    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            fs.attr_cache.put(ino, attr);
            reply.attr(&fs.shared.kernel_attr_ttl, &attr);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}
