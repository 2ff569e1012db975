#![allow(clippy::missing_safety_doc)] // Well, using C-pointers *is* unsafe...

use std::convert::TryFrom;
use std::ffi::{CStr, CString, OsStr};
use std::os::raw::{c_char, c_int, c_long, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{null_mut, slice_from_raw_parts_mut};
use std::sync::Arc;

use errno::{set_errno, Errno};

use stdio_vfs::errors::Error;
use stdio_vfs::{FileManager, FileSystemHandler, StatBuffer, VirtualHandle, Whence};

struct Environment;

impl Environment {
    /// Box the value of `body` or report its failure through `errno` and return NULL.
    pub fn execute<T, E: Error, C: FnOnce() -> Result<T, E>>(body: C) -> *mut T {
        match body() {
            Ok(value) => Box::into_raw(Box::new(value)),
            Err(error) => {
                Environment::report(&error);
                null_mut()
            }
        }
    }

    /// Turn a result into the 0 / -1 convention of the host.
    pub fn status<E: Error>(result: Result<(), E>) -> c_int {
        match result {
            Ok(()) => 0,
            Err(error) => {
                Environment::report(&error);
                -1
            }
        }
    }

    pub fn report<E: Error>(error: &E) {
        if let Some(code) = error.os_error() {
            set_errno(code);
        }
    }

    pub fn invalid<T>(value: T) -> T {
        set_errno(Errno(libc::EINVAL));
        value
    }

    pub fn parse_path<'a>(c_string: *const c_char) -> Option<&'a Path> {
        (!c_string.is_null())
            .then(|| unsafe { CStr::from_ptr(c_string) })
            .map(|raw_str| Path::new(OsStr::from_bytes(raw_str.to_bytes())))
    }

    pub fn parse_str<'a>(c_string: *const c_char) -> Option<&'a str> {
        (!c_string.is_null())
            .then(|| unsafe { CStr::from_ptr(c_string) })
            .and_then(|raw_str| raw_str.to_str().ok())
    }

    pub fn handler(path: &Path) -> Option<Arc<dyn FileSystemHandler>> {
        let handler = FileManager::global().handler(path);
        if handler.is_none() {
            set_errno(Errno(libc::ENOENT));
        }
        handler
    }
}

/// The handle to an open file.
pub struct FileHandle(Box<dyn VirtualHandle>);

/// The status of a path.
#[repr(C)]
pub struct FileStatus {
    /// Size in bytes.
    pub size: u64,
    /// Type and permission bits.
    pub mode: u32,
    /// Time of the last modification in seconds since the epoch.
    pub mtime: i64,
    /// Time of the last access in seconds since the epoch.
    pub atime: i64,
    /// Time of the last status change in seconds since the epoch.
    pub ctime: i64,
}

impl From<StatBuffer> for FileStatus {
    fn from(status: StatBuffer) -> Self {
        FileStatus {
            size: status.size,
            mode: status.mode,
            mtime: status.mtime,
            atime: status.atime,
            ctime: status.ctime,
        }
    }
}

/// Open a file.
///
/// @param path The path of the file.
///
/// @param mode An fopen-style access mode such as "rb" or "w+".
///
/// @return A handle to the file or nullptr on failure, in which case errno describes the cause.
#[no_mangle]
pub unsafe extern "C" fn Open(path: *const c_char, mode: *const c_char) -> *mut FileHandle {
    let (path, mode) = match (Environment::parse_path(path), Environment::parse_str(mode)) {
        (Some(path), Some(mode)) => (path, mode),
        _ => return Environment::invalid(null_mut()),
    };
    let handler = match Environment::handler(path) {
        Some(handler) => handler,
        None => return null_mut(),
    };
    Environment::execute(|| handler.open(path, mode).map(FileHandle))
}

/// Move the position of the next transfer.
///
/// @param handle The file handle.
///
/// @param offset The offset; relative seeks backwards use the two's complement.
///
/// @param whence SEEK_SET, SEEK_CUR or SEEK_END.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Seek(handle: *mut FileHandle, offset: u64, whence: c_int) -> c_int {
    match (handle.as_mut(), Whence::try_from(whence)) {
        (Some(handle), Ok(whence)) => Environment::status(handle.0.seek(offset, whence)),
        _ => Environment::invalid(-1),
    }
}

/// The position of the next transfer.
///
/// @param handle The file handle.
///
/// @return The offset in bytes; 0 for nullptr.
#[no_mangle]
pub unsafe extern "C" fn Tell(handle: *const FileHandle) -> u64 {
    handle.as_ref().map_or(0, |handle| handle.0.tell())
}

/// Read elements into a buffer.
///
/// @param handle The file handle.
///
/// @param buffer The buffer holding at least size * count bytes.
///
/// @return The number of whole elements read.
#[no_mangle]
pub unsafe extern "C" fn Read(
    handle: *mut FileHandle,
    buffer: *mut c_void,
    size: usize,
    count: usize,
) -> usize {
    let (handle, length) = match (handle.as_mut(), size.checked_mul(count)) {
        (Some(handle), Some(length)) if !buffer.is_null() => (handle, length),
        _ => return 0,
    };
    let buffer = std::slice::from_raw_parts_mut(buffer as *mut u8, length);
    handle.0.read(buffer, size, count)
}

/// Write elements from a buffer.
///
/// @param handle The file handle.
///
/// @param buffer The buffer holding at least size * count bytes.
///
/// @return The number of whole elements written.
#[no_mangle]
pub unsafe extern "C" fn Write(
    handle: *mut FileHandle,
    buffer: *const c_void,
    size: usize,
    count: usize,
) -> usize {
    let (handle, length) = match (handle.as_mut(), size.checked_mul(count)) {
        (Some(handle), Some(length)) if !buffer.is_null() => (handle, length),
        _ => return 0,
    };
    let buffer = std::slice::from_raw_parts(buffer as *const u8, length);
    handle.0.write(buffer, size, count)
}

/// Check whether the last read ran into the end of the file.
///
/// @return 1 at the end of the file, 0 otherwise.
#[no_mangle]
pub unsafe extern "C" fn Eof(handle: *const FileHandle) -> c_int {
    match handle.as_ref() {
        Some(handle) if handle.0.eof() => 1,
        _ => 0,
    }
}

/// Hand buffered writes to the operating system.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Flush(handle: *mut FileHandle) -> c_int {
    match handle.as_mut() {
        Some(handle) => Environment::status(handle.0.flush()),
        None => Environment::invalid(-1),
    }
}

/// Resize the file without moving the position.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Truncate(handle: *mut FileHandle, new_size: u64) -> c_int {
    match handle.as_mut() {
        Some(handle) => Environment::status(handle.0.truncate(new_size)),
        None => Environment::invalid(-1),
    }
}

/// Close a file handle. The handle must not be used after the call, whatever the result.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Close(handle: *mut FileHandle) -> c_int {
    if handle.is_null() {
        return Environment::invalid(-1);
    }
    let handle = Box::from_raw(handle);
    Environment::status(handle.0.close())
}

/// The descriptor of the operating system underlying the handle.
///
/// @return The descriptor or -1 for nullptr.
#[no_mangle]
pub unsafe extern "C" fn GetNativeDescriptor(handle: *const FileHandle) -> c_int {
    handle
        .as_ref()
        .map_or(-1, |handle| handle.0.native_descriptor())
}

/// Query the status of a path.
///
/// @param status Receives the status on success.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Stat(path: *const c_char, status: *mut FileStatus) -> c_int {
    let (path, status) = match (Environment::parse_path(path), status.as_mut()) {
        (Some(path), Some(status)) => (path, status),
        _ => return Environment::invalid(-1),
    };
    let handler = match Environment::handler(path) {
        Some(handler) => handler,
        None => return -1,
    };
    Environment::status(handler.stat(path).map(|result| *status = result.into()))
}

/// Remove a file.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Unlink(path: *const c_char) -> c_int {
    let path = match Environment::parse_path(path) {
        Some(path) => path,
        None => return Environment::invalid(-1),
    };
    match Environment::handler(path) {
        Some(handler) => Environment::status(handler.unlink(path)),
        None => -1,
    }
}

/// Move a path.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Rename(old_path: *const c_char, new_path: *const c_char) -> c_int {
    let (old_path, new_path) = match (
        Environment::parse_path(old_path),
        Environment::parse_path(new_path),
    ) {
        (Some(old_path), Some(new_path)) => (old_path, new_path),
        _ => return Environment::invalid(-1),
    };
    match Environment::handler(old_path) {
        Some(handler) => Environment::status(handler.rename(old_path, new_path)),
        None => -1,
    }
}

/// Create a directory.
///
/// @param mode The permission bits, e.g. 0755.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Mkdir(path: *const c_char, mode: c_long) -> c_int {
    let path = match Environment::parse_path(path) {
        Some(path) => path,
        None => return Environment::invalid(-1),
    };
    match Environment::handler(path) {
        Some(handler) => Environment::status(handler.mkdir(path, mode as u32)),
        None => -1,
    }
}

/// Remove an empty directory.
///
/// @return 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn Rmdir(path: *const c_char) -> c_int {
    let path = match Environment::parse_path(path) {
        Some(path) => path,
        None => return Environment::invalid(-1),
    };
    match Environment::handler(path) {
        Some(handler) => Environment::status(handler.rmdir(path)),
        None => -1,
    }
}

/// List the names in a directory. An empty path lists the current directory.
///
/// @return A nullptr-terminated list to be freed with DestroyDirectoryList, or nullptr if the
/// directory cannot be opened.
#[no_mangle]
pub unsafe extern "C" fn ReadDir(path: *const c_char) -> *mut *mut c_char {
    let path = match Environment::parse_path(path) {
        Some(path) => path,
        None => return Environment::invalid(null_mut()),
    };
    let names = match Environment::handler(path).and_then(|handler| handler.read_dir(path)) {
        Some(names) => names,
        None => return null_mut(),
    };

    let mut list: Vec<*mut c_char> = names
        .into_iter()
        .filter_map(|name| CString::new(name.as_bytes()).ok())
        .map(CString::into_raw)
        .collect();
    list.push(null_mut());
    Box::into_raw(list.into_boxed_slice()) as *mut *mut c_char
}

/// Destroy a list returned by ReadDir.
///
/// @param list The list. Passing nullptr is a safe no-op.
#[no_mangle]
pub unsafe extern "C" fn DestroyDirectoryList(list: *mut *mut c_char) {
    if list.is_null() {
        return;
    }
    let mut length = 0;
    while !(*list.add(length)).is_null() {
        length += 1;
    }
    let entries = Box::from_raw(slice_from_raw_parts_mut(list, length + 1));
    for entry in entries.iter().take(length) {
        drop(CString::from_raw(*entry));
    }
}

/// Bytes available on the file system containing a path.
///
/// @return The number of bytes or -1 if unknown.
#[no_mangle]
pub unsafe extern "C" fn GetDiskFreeSpace(path: *const c_char) -> i64 {
    Environment::parse_path(path)
        .and_then(|path| Environment::handler(path).map(|handler| handler.disk_free_space(path)))
        .unwrap_or(-1)
}
