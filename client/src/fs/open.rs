//! `Open`, `Read`, `Write`, `Release`, `Flush`, `Fsync` — spec.md §4.7.
//!
//! `Open` is the pipeline's "on first access" trigger (spec.md §4.6):
//! lookup the sidecar, fail `NoEntry` if tombstoned, otherwise bring the
//! full path into existence via the populate pipeline (a no-op if already
//! materialized) and open the backend fd. Reads and writes are plain
//! `pread`/`pwrite` against that fd; every write marks the path dirty on
//! the change tracker, and `Release` notifies the tracker the handle
//! closed — spec.md §5's tracker-monotonicity guarantee.

use super::{OpenFile, RemoteFS};
use fuser::{ReplyData, ReplyEmpty, ReplyOpen, ReplyWrite, Request};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;

pub fn open(fs: &mut RemoteFS, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
    let rel = match fs.path_for(ino) {
        Ok(p) => p,
        Err(errno) => {
            reply.error(errno);
            return;
        }
    };
    let backend_path = fs.shared.backend_path(&rel);

    match fs.shared.meta_store.stat(&backend_path) {
        Ok(Some(state)) if state.deleted() => {
            reply.error(libc::ENOENT);
            return;
        }
        Ok(_) => {}
        Err(e) => {
            reply.error(e.to_errno());
            return;
        }
    }

    let writable = flags & (libc::O_WRONLY | libc::O_RDWR) != 0;
    if writable {
        if let Err(e) = fs.shared.check_writable() {
            reply.error(e.to_errno());
            return;
        }
    }

    if let Err(e) = fs.shared.ensure_populated(&rel) {
        reply.error(e.to_errno());
        return;
    }

    let file = match std::fs::OpenOptions::new()
        .read(true)
        .write(writable)
        .custom_flags(flags & !(libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC))
        .open(&backend_path)
    {
        Ok(f) => f,
        Err(e) => {
            reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            return;
        }
    };

    let fh = fs.alloc_fh();
    fs.open_files.insert(
        fh,
        OpenFile {
            rel_path: rel,
            file,
            writable,
        },
    );
    reply.opened(fh, 0);
}

#[allow(clippy::too_many_arguments)]
pub fn read(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    _ino: u64,
    fh: u64,
    offset: i64,
    size: u32,
    _flags: i32,
    _lock_owner: Option<u64>,
    reply: ReplyData,
) {
    let open_file = match fs.open_files.get_mut(&fh) {
        Some(f) => f,
        None => {
            reply.error(libc::EBADF);
            return;
        }
    };

    let mut buf = vec![0u8; size as usize];
    let read_result = (|| -> std::io::Result<usize> {
        open_file.file.seek(SeekFrom::Start(offset as u64))?;
        let mut total = 0;
        loop {
            let n = open_file.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        Ok(total)
    })();

    match read_result {
        Ok(n) => reply.data(&buf[..n]),
        Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn write(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    _ino: u64,
    fh: u64,
    offset: i64,
    data: &[u8],
    _write_flags: u32,
    _flags: i32,
    _lock_owner: Option<u64>,
    reply: ReplyWrite,
) {
    if let Err(e) = fs.shared.check_writable() {
        reply.error(e.to_errno());
        return;
    }

    let rel = match fs.open_files.get(&fh) {
        Some(f) => f.rel_path.clone(),
        None => {
            reply.error(libc::EBADF);
            return;
        }
    };

    let open_file = fs.open_files.get_mut(&fh).unwrap();
    if !open_file.writable {
        reply.error(libc::EBADF);
        return;
    }

    let write_result = (|| -> std::io::Result<usize> {
        open_file.file.seek(SeekFrom::Start(offset as u64))?;
        open_file.file.write_all(data)?;
        Ok(data.len())
    })();

    match write_result {
        Ok(n) => {
            fs.shared.tracker.touch(fs.shared.meta_store.as_ref(), &fs.shared.backend.path, &rel);
            reply.written(n as u32);
        }
        Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

pub fn release(
    fs: &mut RemoteFS,
    _req: &Request<'_>,
    _ino: u64,
    fh: u64,
    _flags: i32,
    _lock_owner: Option<u64>,
    _flush: bool,
    reply: ReplyEmpty,
) {
    if let Some(open_file) = fs.open_files.remove(&fh) {
        if open_file.writable {
            fs.shared.tracker.close(
                fs.shared.meta_store.as_ref(),
                &fs.shared.backend.path,
                &open_file.rel_path,
            );
        }
    }
    reply.ok();
}

pub fn flush(fs: &mut RemoteFS, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
    if let Some(open_file) = fs.open_files.get_mut(&fh) {
        let _ = open_file.file.flush();
    }
    reply.ok();
}

pub fn fsync(fs: &mut RemoteFS, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
    match fs.open_files.get(&fh) {
        Some(open_file) => match open_file.file.sync_all() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        },
        None => reply.error(libc::EBADF),
    }
}
