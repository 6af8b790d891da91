//! `Lookup`, `Readlink`, `Access`, directory reads — spec.md §4.7.
//!
//! `readdir` lists the backend directory, skipping `.aydo` snapshot
//! backups and already-downloaded `.meta` sidecars, exposing the implied
//! name for sidecars whose data hasn't been populated yet, and hiding
//! tombstoned (overlay-deleted) entries — spec.md §4.7's `Readdir`
//! procedure. Per this spec's Open Question 3, a `readdir` error here
//! propagates instead of silently truncating the listing after the first
//! batch.

use super::attr::resolve_attr;
use super::{kind_from_meta, OpenDir, RemoteFS};
use fuser::{FileType, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen};
use std::ffi::OsStr;

/// Matches the upload pipeline's snapshot naming, `<name>_<nanos>.aydo`
/// (spec.md §4.7's `Readdir` procedure: "Skip names matching
/// `_\d+\.aydo$`"), without pulling in a regex dependency for one suffix
/// check.
fn is_aydo_backup(name: &str) -> bool {
    let Some(rest) = name.strip_suffix(".aydo") else {
        return false;
    };
    match rest.rsplit_once('_') {
        Some((_, digits)) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

pub fn lookup(fs: &mut RemoteFS, _req: &fuser::Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
    let parent_rel = match fs.path_for(parent) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let rel = parent_rel.join(name);

    let ino = fs.inode_for(&rel);
    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            fs.attr_cache.put(ino, attr);
            reply.entry(&fs.shared.kernel_entry_ttl, &attr, 0);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}

pub fn readlink(fs: &mut RemoteFS, _req: &fuser::Request, ino: u64, reply: fuser::ReplyData) {
    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let backend_path = fs.shared.backend_path(&rel);

    match std::fs::read_link(&backend_path) {
        Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
        Err(_) => match fs.shared.meta_store.get(&backend_path) {
            Ok(Some(md)) if !md.state.deleted() => reply.data(md.extended.as_bytes()),
            _ => reply.error(libc::ENOENT),
        },
    }
}

pub fn access(fs: &mut RemoteFS, _req: &fuser::Request, ino: u64, mask: i32, reply: ReplyEmpty) {
    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    match resolve_attr(fs, ino, &rel) {
        Ok(attr) => {
            // Passthrough check against the resolved mode bits; ownership
            // match isn't modeled since the mount typically runs as a
            // single effective user (`allow_other`/root aside).
            let perm = attr.perm as i32;
            let requested = mask & (libc::R_OK | libc::W_OK | libc::X_OK);
            let granted = ((perm >> 6) & 0o7) | ((perm >> 3) & 0o7) | (perm & 0o7);
            if requested & !granted != 0 {
                reply.error(libc::EACCES);
            } else {
                reply.ok();
            }
        }
        Err(e) => reply.error(e.to_errno()),
    }
}

pub fn opendir(fs: &mut RemoteFS, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    if let Err(e) = fs.shared.ensure_populated(&rel) {
        reply.error(e.to_errno());
        return;
    }

    let fh = fs.alloc_fh();
    fs.open_dirs.insert(fh, OpenDir { rel_path: rel });
    reply.opened(fh, 0);
}

pub fn readdir(
    fs: &mut RemoteFS,
    _req: &fuser::Request,
    ino: u64,
    fh: u64,
    offset: i64,
    mut reply: ReplyDirectory,
) {
    let rel = match fs.open_dirs.get(&fh) {
        Some(d) => d.rel_path.clone(),
        None => match fs.path_for(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        },
    };
    let backend_dir = fs.shared.backend_path(&rel);

    let mut names: Vec<(std::ffi::OsString, FileType)> = Vec::new();

    let entries = match std::fs::read_dir(&backend_dir) {
        Ok(e) => e,
        Err(e) => {
            reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
                return;
            }
        };
        let file_name = entry.file_name();
        let name_str = file_name.to_string_lossy();

        if is_aydo_backup(&name_str) {
            continue;
        }

        if let Some(stripped) = name_str.strip_suffix(".meta") {
            let data_path = backend_dir.join(stripped);
            if data_path.exists() {
                // The data file already carries this entry; its sidecar is
                // pure bookkeeping and shouldn't appear twice.
                continue;
            }
            let entry_rel = rel.join(stripped);
            let entry_backend_path = fs.shared.backend_path(&entry_rel);
            match fs.shared.meta_store.get(&entry_backend_path) {
                Ok(Some(md)) if !md.state.deleted() => {
                    names.push((std::ffi::OsString::from(stripped), kind_from_meta(&md)));
                }
                _ => {}
            }
            continue;
        }

        let entry_rel = rel.join(&file_name);
        let entry_backend_path = fs.shared.backend_path(&entry_rel);
        if let Ok(Some(md)) = fs.shared.meta_store.get(&entry_backend_path) {
            if md.state.deleted() {
                continue;
            }
        }

        let kind = match entry.file_type() {
            Ok(t) => {
                if t.is_dir() {
                    FileType::Directory
                } else if t.is_symlink() {
                    FileType::Symlink
                } else {
                    FileType::RegularFile
                }
            }
            Err(_) => FileType::RegularFile,
        };
        names.push((file_name, kind));
    }

    let mut all = vec![
        (".".to_string(), FileType::Directory),
        ("..".to_string(), FileType::Directory),
    ];
    all.extend(names.into_iter().map(|(n, k)| (n.to_string_lossy().to_string(), k)));

    for (i, (name, kind)) in all.into_iter().enumerate().skip(offset as usize) {
        let child_rel = if name == "." || name == ".." {
            rel.clone()
        } else {
            rel.join(&name)
        };
        let child_ino = fs.inode_for(&child_rel);
        if reply.add(child_ino, (i + 1) as i64, kind, &name) {
            break;
        }
    }
    reply.ok();
}

pub fn releasedir(_fs: &mut RemoteFS, _req: &fuser::Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
    _fs.open_dirs.remove(&fh);
    reply.ok();
}

pub fn fsyncdir(_fs: &mut RemoteFS, _req: &fuser::Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
    reply.ok();
}
