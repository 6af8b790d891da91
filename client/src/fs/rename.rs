//! `Rename`, `Link` — spec.md §4.7.
//!
//! `rename` moves the backend data file and rewrites both sidecars in the
//! same call: the destination inherits the source's sidecar contents
//! (marked `modified`, since the moved file now differs from whatever the
//! manifest says lives at that path), and the source sidecar is dropped in
//! `Ro`/`Rw` mode or tombstoned in `Ol` mode — the same branch `delete.rs`
//! takes, since a rename-away is, from the old path's perspective, a
//! deletion.

use super::RemoteFS;
use fuser::{ReplyEmpty, ReplyEntry, Request};
use std::ffi::OsStr;
use std::path::PathBuf;

fn rekey_inode(fs: &mut RemoteFS, old_rel: &std::path::Path, new_rel: &std::path::Path) {
    if let Some(ino) = fs.path_to_inode.remove(old_rel) {
        fs.path_to_inode.insert(new_rel.to_path_buf(), ino);
        fs.inode_to_path.insert(ino, new_rel.to_path_buf());
        fs.attr_cache.invalidate(ino);
    }
}

pub fn rename(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    parent: u64,
    name: &OsStr,
    newparent: u64,
    newname: &OsStr,
    _flags: u32,
    reply: ReplyEmpty,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }

    let old_parent_rel = match fs.path_for(parent) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let new_parent_rel = match fs.path_for(newparent) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let old_rel = old_parent_rel.join(name);
    let new_rel = new_parent_rel.join(newname);

    if let Err(e) = fs.shared.ensure_populated(&old_rel) {
        reply.error(e.to_errno());
        return;
    }
    if let Err(e) = fs.shared.ensure_populated(&new_parent_rel) {
        reply.error(e.to_errno());
        return;
    }

    let old_backend = fs.shared.backend_path(&old_rel);
    let new_backend = fs.shared.backend_path(&new_rel);

    if let Err(e) = std::fs::rename(&old_backend, &new_backend) {
        reply.error(e.raw_os_error().unwrap_or(libc::EIO));
        return;
    }

    let move_result = (|| -> fs_core::FsResult<()> {
        let old_meta = fs.shared.meta_store.get(&old_backend)?;

        if let Some(mut md) = old_meta.clone() {
            md.state.set_modified();
            fs.shared.meta_store.save(&new_backend, &md)?;
        }

        if let Some(mut md) = old_meta {
            if fs.shared.is_overlay() {
                md.state.set_deleted();
                md.state.set_modified();
                fs.shared.meta_store.save(&old_backend, &md)?;
            } else {
                fs.shared.meta_store.delete(&old_backend)?;
            }
        }
        Ok(())
    })();

    if let Err(e) = move_result {
        reply.error(e.to_errno());
        return;
    }

    fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &new_rel);
    rekey_inode(fs, &old_rel, &new_rel);
    reply.ok();
}

/// Hard links aren't part of the content model (each path owns its own
/// sidecar); this best-effort implementation links the backend file and
/// gives the new path an independent copy of the source's sidecar,
/// matching the degraded-but-functional passthrough spec.md's Non-goals
/// call for instead of rejecting the call outright.
pub fn link(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }

    let rel: PathBuf = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let new_parent_rel = match fs.path_for(newparent) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let new_rel = new_parent_rel.join(newname);

    if let Err(e) = fs.shared.ensure_populated(&rel) {
        reply.error(e.to_errno());
        return;
    }

    let backend_path = fs.shared.backend_path(&rel);
    let new_backend_path = fs.shared.backend_path(&new_rel);

    if let Err(e) = std::fs::hard_link(&backend_path, &new_backend_path) {
        reply.error(e.raw_os_error().unwrap_or(libc::EIO));
        return;
    }

    if let Ok(Some(md)) = fs.shared.meta_store.get(&backend_path) {
        if let Err(e) = fs.shared.meta_store.save(&new_backend_path, &md) {
            reply.error(e.to_errno());
            return;
        }
    }
    fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &new_rel);

    let new_ino = fs.inode_for(&new_rel);
    match super::attr::resolve_attr(fs, new_ino, &new_rel) {
        Ok(attr) => {
            fs.attr_cache.put(new_ino, attr);
            reply.entry(&fs.shared.kernel_entry_ttl, &attr, 0);
        }
        Err(e) => reply.error(e.to_errno()),
    }
}
