//! `Statfs` — ambient FUSE plumbing the mount needs to behave like a real
//! filesystem (`df`, free-space-aware tools) even though spec.md's content
//! model has no notion of capacity of its own; this simply forwards to the
//! backend directory's own filesystem.

use super::RemoteFS;
use fuser::{ReplyStatfs, Request};

pub fn statfs(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let backend_path = fs.shared.backend_path(&rel);
    let statvfs_path = if backend_path.exists() {
        backend_path
    } else {
        fs.shared.backend.path.clone()
    };

    let c_path = match std::ffi::CString::new(statvfs_path.as_os_str().as_encoded_bytes()) {
        Ok(p) => p,
        Err(_) => {
            reply.error(libc::EINVAL);
            return;
        }
    };

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        return;
    }

    reply.statfs(
        stat.f_blocks,
        stat.f_bfree,
        stat.f_bavail,
        stat.f_files,
        stat.f_ffree,
        stat.f_bsize as u32,
        stat.f_namemax as u32,
        stat.f_frsize as u32,
    );
}
