//! Extended attributes — passthrough only, per spec.md's Non-goals
//! ("extended-attribute semantics beyond passthrough" are out of scope).
//! Each call forwards straight to the backend file's own xattrs via the
//! raw `l*xattr` syscalls, the same `libc`-direct style `attr.rs` uses for
//! `chown`/`utimensat`.

use super::RemoteFS;
use fuser::{ReplyEmpty, ReplyXattr, Request};
use std::ffi::{CString, OsStr};

fn backend_cpath(fs: &mut RemoteFS, ino: u64) -> Result<CString, i32> {
    let rel = fs.path_for(ino)?;
    let backend_path = fs.shared.backend_path(&rel);
    CString::new(backend_path.as_os_str().as_encoded_bytes()).map_err(|_| libc::EINVAL)
}

fn name_cstring(name: &OsStr) -> Result<CString, i32> {
    CString::new(name.as_encoded_bytes()).map_err(|_| libc::EINVAL)
}

pub fn setxattr(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    ino: u64,
    name: &OsStr,
    value: &[u8],
    flags: i32,
    _position: u32,
    reply: ReplyEmpty,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let c_path = match backend_cpath(fs, ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let c_name = match name_cstring(name) {
        Ok(n) => n,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    let rc = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            flags,
        )
    };
    if rc != 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
    } else {
        reply.ok();
    }
}

pub fn getxattr(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
    let c_path = match backend_cpath(fs, ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let c_name = match name_cstring(name) {
        Ok(n) => n,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    let needed = unsafe { libc::lgetxattr(c_path.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0) };
    if needed < 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::ENODATA));
        return;
    }

    if size == 0 {
        reply.size(needed as u32);
        return;
    }

    let mut buf = vec![0u8; needed as usize];
    let got = unsafe {
        libc::lgetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if got < 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::ENODATA));
        return;
    }
    buf.truncate(got as usize);

    if (got as u32) > size {
        reply.error(libc::ERANGE);
    } else {
        reply.data(&buf);
    }
}

pub fn listxattr(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
    let c_path = match backend_cpath(fs, ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    let needed = unsafe { libc::llistxattr(c_path.as_ptr(), std::ptr::null_mut(), 0) };
    if needed < 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        return;
    }

    if size == 0 {
        reply.size(needed as u32);
        return;
    }

    let mut buf = vec![0u8; needed as usize];
    let got = unsafe { libc::llistxattr(c_path.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if got < 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        return;
    }
    buf.truncate(got as usize);

    if (got as u32) > size {
        reply.error(libc::ERANGE);
    } else {
        reply.data(&buf);
    }
}

pub fn removexattr(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }
    let c_path = match backend_cpath(fs, ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let c_name = match name_cstring(name) {
        Ok(n) => n,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };

    let rc = unsafe { libc::lremovexattr(c_path.as_ptr(), c_name.as_ptr()) };
    if rc != 0 {
        reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::ENODATA));
    } else {
        reply.ok();
    }
}
