//! Filesystem syscalls: open/close/read/write/seek/stat and the directory
//! operations that only need a path, not an open descriptor.

use alloc::sync::Arc;

use crate::error::{FsError, KernelError, KernelResult};
use crate::fs::{get_vfs, File, OpenFileBackend, OpenFlags, Permissions, SeekFrom};
use crate::fs::pipe;
use crate::mm::user_validation::{copy_from_user, copy_to_user, copy_user_cstring};
use crate::sched::Task;

/// Largest single `read`/`write` this kernel will copy through a kernel
/// buffer in one call; callers asking for more just get a short read or
/// write, same as Linux does for sufficiently large requests.
const MAX_IO_CHUNK: usize = 64 * 1024;

fn bad_fd() -> KernelError {
    KernelError::FsError(FsError::BadFileDescriptor)
}

pub fn sys_read(current: &Arc<Task>, fd: u64, buf_ptr: u64, len: u64) -> KernelResult<i64> {
    let file = current.files.get(fd as usize).ok_or_else(bad_fd)?;
    let len = (len as usize).min(MAX_IO_CHUNK);
    let mut kbuf = alloc::vec![0u8; len];
    let n = file.read(&mut kbuf)?;
    copy_to_user(buf_ptr as usize, &kbuf[..n])?;
    Ok(n as i64)
}

pub fn sys_write(current: &Arc<Task>, fd: u64, buf_ptr: u64, len: u64) -> KernelResult<i64> {
    let file = current.files.get(fd as usize).ok_or_else(bad_fd)?;
    let len = (len as usize).min(MAX_IO_CHUNK);
    let mut kbuf = alloc::vec![0u8; len];
    copy_from_user(&mut kbuf, buf_ptr as usize)?;
    let n = file.write(&kbuf)?;
    Ok(n as i64)
}

pub fn sys_open(current: &Arc<Task>, path_ptr: u64, flags: u64, _mode: u64) -> KernelResult<i64> {
    let path = copy_user_cstring(path_ptr as usize)?;
    let open_flags =
        OpenFlags::from_bits(flags as u32).ok_or(KernelError::InvalidArgument { name: "flags", value: "open" })?;

    let node = {
        let vfs = get_vfs().read();
        vfs.open(&path, open_flags)?
    };
    let file = Arc::new(File::new_with_path(OpenFileBackend::RegularFile(node), open_flags, path));
    let fd = current.files.open(file)?;
    Ok(fd as i64)
}

pub fn sys_close(current: &Arc<Task>, fd: u64) -> KernelResult<i64> {
    current.files.close(fd as usize)?;
    Ok(0)
}

pub fn sys_lseek(current: &Arc<Task>, fd: u64, offset: u64, whence: u64) -> KernelResult<i64> {
    let file = current.files.get(fd as usize).ok_or_else(bad_fd)?;
    let from = match whence {
        0 => SeekFrom::Start(offset as usize),
        1 => SeekFrom::Current(offset as i64 as isize),
        2 => SeekFrom::End(offset as i64 as isize),
        _ => return Err(KernelError::InvalidArgument { name: "whence", value: "lseek" }),
    };
    Ok(file.seek(from)? as i64)
}

/// Minimal `stat`/`fstat` payload: this kernel doesn't model the full
/// glibc `struct stat` layout, just enough fields (size, node kind, mode
/// bits) for userspace to distinguish a regular file from a directory and
/// know how big it is.
#[repr(C)]
struct RawStat {
    size: u64,
    node_type: u32,
    mode: u32,
}

pub fn sys_stat(current: &Arc<Task>, path_or_fd: u64, statbuf_ptr: u64, is_fstat: bool) -> KernelResult<i64> {
    let metadata = if is_fstat {
        let file = current.files.get(path_or_fd as usize).ok_or_else(bad_fd)?;
        match &file.backend {
            OpenFileBackend::RegularFile(node) => node.metadata()?,
            _ => return Err(KernelError::FsError(FsError::NotSupported)),
        }
    } else {
        let path = copy_user_cstring(path_or_fd as usize)?;
        let vfs = get_vfs().read();
        let node = vfs.resolve_path(&path)?;
        node.metadata()?
    };

    let raw = RawStat {
        size: metadata.size as u64,
        node_type: metadata.node_type as u32,
        mode: permissions_to_mode(&metadata.permissions),
    };
    // SAFETY: RawStat is repr(C) and plain-old-data; viewing it as bytes for
    // the user copy below reads exactly its own size, nothing past it.
    let bytes = unsafe {
        core::slice::from_raw_parts(&raw as *const RawStat as *const u8, core::mem::size_of::<RawStat>())
    };
    copy_to_user(statbuf_ptr as usize, bytes)?;
    Ok(0)
}

fn permissions_to_mode(p: &Permissions) -> u32 {
    let mut mode = 0u32;
    mode |= (p.owner_read as u32) << 8;
    mode |= (p.owner_write as u32) << 7;
    mode |= (p.owner_exec as u32) << 6;
    mode |= (p.group_read as u32) << 5;
    mode |= (p.group_write as u32) << 4;
    mode |= (p.group_exec as u32) << 3;
    mode |= (p.other_read as u32) << 2;
    mode |= (p.other_write as u32) << 1;
    mode |= p.other_exec as u32;
    mode
}

pub fn sys_pipe(current: &Arc<Task>, fds_ptr: u64) -> KernelResult<i64> {
    let (reader, writer) = pipe::create_pipe()?;
    let read_fd =
        current.files.open(Arc::new(File::new(OpenFileBackend::PipeRead(Arc::new(reader)), OpenFlags::read_only())))?;
    let write_fd = current
        .files
        .open(Arc::new(File::new(OpenFileBackend::PipeWrite(Arc::new(writer)), OpenFlags::write_only())))?;
    let raw: [i32; 2] = [read_fd as i32, write_fd as i32];
    // SAFETY: two contiguous i32s, safe to view as bytes for the user copy.
    let bytes = unsafe { core::slice::from_raw_parts(raw.as_ptr() as *const u8, 8) };
    copy_to_user(fds_ptr as usize, bytes)?;
    Ok(0)
}

pub fn sys_dup(current: &Arc<Task>, fd: u64) -> KernelResult<i64> {
    Ok(current.files.dup(fd as usize)? as i64)
}

pub fn sys_dup2(current: &Arc<Task>, old_fd: u64, new_fd: u64) -> KernelResult<i64> {
    current.files.dup2(old_fd as usize, new_fd as usize)?;
    Ok(new_fd as i64)
}

pub fn sys_truncate(current: &Arc<Task>, path_or_fd: u64, len: u64, is_ftruncate: bool) -> KernelResult<i64> {
    if is_ftruncate {
        let file = current.files.get(path_or_fd as usize).ok_or_else(bad_fd)?;
        match &file.backend {
            OpenFileBackend::RegularFile(node) => node.truncate(len as usize)?,
            _ => return Err(KernelError::FsError(FsError::NotSupported)),
        }
    } else {
        let path = copy_user_cstring(path_or_fd as usize)?;
        let vfs = get_vfs().read();
        vfs.resolve_path(&path)?.truncate(len as usize)?;
    }
    Ok(0)
}

pub fn sys_mkdir(path_ptr: u64) -> KernelResult<i64> {
    let path = copy_user_cstring(path_ptr as usize)?;
    get_vfs().write().mkdir(&path, Permissions::default())?;
    Ok(0)
}

pub fn sys_unlink(path_ptr: u64) -> KernelResult<i64> {
    let path = copy_user_cstring(path_ptr as usize)?;
    get_vfs().write().unlink(&path)?;
    Ok(0)
}

pub fn sys_fsync() -> KernelResult<i64> {
    get_vfs().write().sync()?;
    Ok(0)
}

/// `access(path, mode)`, simplified to existence: this filesystem has no
/// per-user permission checks to actually evaluate against `mode`.
pub fn sys_access(path_ptr: u64) -> KernelResult<i64> {
    let path = copy_user_cstring(path_ptr as usize)?;
    get_vfs().read().resolve_path(&path)?;
    Ok(0)
}
