//! `Unlink`, `Rmdir` — spec.md §4.7.
//!
//! In `Ro`/`Rw` mode these remove the backend entry and its sidecar
//! outright. In `Ol` mode the path must still resolve as gone to this
//! mount while the underlying object remains fetchable elsewhere, so the
//! backend entry is removed but the sidecar is kept and flipped to the
//! `deleted` state bit (spec.md §4.5) — a tombstone `readdir`/`getattr`
//! both honor.

use super::RemoteFS;
use fuser::{ReplyEmpty, Request};
use std::ffi::OsStr;

fn tombstone_or_remove(fs: &RemoteFS, backend_path: &std::path::Path, is_dir: bool) -> fs_core::FsResult<()> {
    if is_dir {
        std::fs::remove_dir(backend_path)?;
    } else {
        std::fs::remove_file(backend_path)?;
    }

    if fs.shared.is_overlay() {
        if let Some(mut md) = fs.shared.meta_store.get(backend_path)? {
            md.state.set_deleted();
            md.state.set_modified();
            fs.shared.meta_store.save(backend_path, &md)?;
        }
    } else {
        fs.shared.meta_store.delete(backend_path)?;
    }
    Ok(())
}

pub fn unlink(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let parent_rel = match fs.path_for(parent) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let rel = parent_rel.join(name);
    let backend_path = fs.shared.backend_path(&rel);

    match tombstone_or_remove(fs, &backend_path, false) {
        Ok(()) => {
            let ino = fs.inode_for(&rel);
            fs.attr_cache.invalidate(ino);
            reply.ok();
        }
        Err(e) => reply.error(e.to_errno()),
    }
}

pub fn rmdir(fs: &mut RemoteFS, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let parent_rel = match fs.path_for(parent) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let rel = parent_rel.join(name);
    let backend_path = fs.shared.backend_path(&rel);

    match tombstone_or_remove(fs, &backend_path, true) {
        Ok(()) => {
            let ino = fs.inode_for(&rel);
            fs.attr_cache.invalidate(ino);
            reply.ok();
        }
        Err(e) => reply.error(e.to_errno()),
    }
}
