//! Sample storage driver exported through the C ABI.
//!
//! Serves the `sample` scheme from the local file system: the URI
//! `sample://<host>/<path>` names the local file `/<path>`, the host part is
//! ignored. Built as a `cdylib` it is picked up by the driver scan when
//! named `filestoredriver_file_sample` and placed in a search directory.
//!
//! ```text
//!   host ──driver_fopen("sample://h/tmp/a", 'r')──► Box<File> as *mut c_void
//!        ──driver_fread(buf, 1, n, stream)────────► bytes read
//!        ──driver_fclose(stream)──────────────────► Box dropped
//! ```
//!
//! Errors are kept per thread and returned by `driver_getlasterror`. The
//! connection state is informational: the local file system needs none.

#![allow(non_snake_case)]

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::raw::{c_char, c_int, c_longlong, c_void};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use driver_api::ffi::{EOF, FAILURE, SEEK_SET, SUCCESS};
use driver_api::MB;
use log::{debug, warn};

pub const SCHEME: &str = "sample";

const SEEK_CUR: c_int = 1;
const SEEK_END: c_int = 2;

#[allow(clippy::cast_possible_wrap)]
const PREFERRED_BUFFER_SIZE: c_longlong = (4 * MB) as c_longlong;

static CONNECTED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

fn set_last_error(message: &str) {
    warn!("{SCHEME} driver: {message}");
    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|last| *last.borrow_mut() = text);
}

/// Local path named by a `sample://host/path` URI.
#[must_use]
pub fn local_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix(SCHEME)?.strip_prefix("://")?;
    let start = rest.find('/')?;
    Some(PathBuf::from(&rest[start..]))
}

/// # Safety
/// `ptr` is null or a NUL-terminated string.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if ptr.is_null() {
        set_last_error("null string argument");
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy())
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
unsafe fn uri_path(uri: *const c_char) -> Option<PathBuf> {
    let uri = c_str(uri)?;
    let path = local_path(&uri);
    if path.is_none() {
        set_last_error(&format!("{uri}: not a {SCHEME} URI"));
    }
    path
}

fn flag(value: bool) -> c_int {
    if value {
        SUCCESS
    } else {
        FAILURE
    }
}

fn outcome(path: &Path, operation: &str, result: std::io::Result<()>) -> c_int {
    match result {
        Ok(()) => SUCCESS,
        Err(e) => {
            set_last_error(&format!("{}: unable to {operation} ({e})", path.display()));
            FAILURE
        }
    }
}

#[no_mangle]
pub extern "C" fn driver_getDriverName() -> *const c_char {
    c"Sample local driver".as_ptr()
}

#[no_mangle]
pub extern "C" fn driver_getVersion() -> *const c_char {
    c"0.1.0".as_ptr()
}

#[no_mangle]
pub extern "C" fn driver_getScheme() -> *const c_char {
    c"sample".as_ptr()
}

#[no_mangle]
pub extern "C" fn driver_isReadOnly() -> c_int {
    FAILURE
}

#[no_mangle]
pub extern "C" fn driver_connect() -> c_int {
    CONNECTED.store(true, Ordering::Release);
    debug!("{SCHEME} driver connected");
    SUCCESS
}

#[no_mangle]
pub extern "C" fn driver_disconnect() -> c_int {
    CONNECTED.store(false, Ordering::Release);
    debug!("{SCHEME} driver disconnected");
    SUCCESS
}

#[no_mangle]
pub extern "C" fn driver_isConnected() -> c_int {
    flag(CONNECTED.load(Ordering::Acquire))
}

#[no_mangle]
pub extern "C" fn driver_getSystemPreferredBufferSize() -> c_longlong {
    PREFERRED_BUFFER_SIZE
}

/// Text of the last error on this thread, empty if none.
#[no_mangle]
pub extern "C" fn driver_getlasterror() -> *const c_char {
    // The string lives in the thread local until the next failure
    LAST_ERROR.with(|last| last.borrow().as_ptr())
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_fileExists(uri: *const c_char) -> c_int {
    uri_path(uri).map_or(FAILURE, |path| flag(path.is_file()))
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_dirExists(uri: *const c_char) -> c_int {
    uri_path(uri).map_or(FAILURE, |path| flag(path.is_dir()))
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_getFileSize(uri: *const c_char) -> c_longlong {
    let Some(path) = uri_path(uri) else {
        return -1;
    };
    match fs::metadata(&path) {
        Ok(metadata) => c_longlong::try_from(metadata.len()).unwrap_or(-1),
        Err(e) => {
            set_last_error(&format!("{}: unable to get size ({e})", path.display()));
            -1
        }
    }
}

/// Open a stream. `mode` is `r`, `w` or `a`.
///
/// # Safety
/// `uri` is null or a NUL-terminated string. The returned stream is closed
/// with [`driver_fclose`] exactly once.
#[no_mangle]
pub unsafe extern "C" fn driver_fopen(uri: *const c_char, mode: c_char) -> *mut c_void {
    let Some(path) = uri_path(uri) else {
        return std::ptr::null_mut();
    };
    #[allow(clippy::cast_sign_loss)]
    let opened = match mode as u8 {
        b'r' => File::open(&path),
        b'w' => File::create(&path),
        b'a' => OpenOptions::new().append(true).create(true).open(&path),
        other => {
            set_last_error(&format!("unknown open mode '{}'", char::from(other)));
            return std::ptr::null_mut();
        }
    };
    match opened {
        Ok(file) => Box::into_raw(Box::new(file)).cast::<c_void>(),
        Err(e) => {
            set_last_error(&format!("{}: unable to open ({e})", path.display()));
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `stream` came from [`driver_fopen`] and is not used afterwards.
#[no_mangle]
pub unsafe extern "C" fn driver_fclose(stream: *mut c_void) -> c_int {
    if stream.is_null() {
        set_last_error("close of a null stream");
        return EOF;
    }
    drop(Box::from_raw(stream.cast::<File>()));
    0
}

/// # Safety
/// `stream` came from [`driver_fopen`] and is still open.
#[no_mangle]
pub unsafe extern "C" fn driver_fseek(
    stream: *mut c_void,
    offset: c_longlong,
    whence: c_int,
) -> c_int {
    let Some(file) = stream.cast::<File>().as_mut() else {
        set_last_error("seek on a null stream");
        return -1;
    };
    let target = match whence {
        SEEK_SET => u64::try_from(offset).map(SeekFrom::Start).ok(),
        SEEK_CUR => Some(SeekFrom::Current(offset)),
        SEEK_END => Some(SeekFrom::End(offset)),
        _ => None,
    };
    let Some(target) = target else {
        set_last_error(&format!("invalid seek ({offset}, {whence})"));
        return -1;
    };
    match file.seek(target) {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&format!("unable to seek ({e})"));
            -1
        }
    }
}

/// Read up to `count` items of `size` bytes.
///
/// # Returns
/// The number of whole items read, `-1` on failure.
///
/// # Safety
/// `ptr` is valid for `size * count` bytes and `stream` is open.
#[no_mangle]
pub unsafe extern "C" fn driver_fread(
    ptr: *mut c_void,
    size: usize,
    count: usize,
    stream: *mut c_void,
) -> c_longlong {
    let Some(file) = stream.cast::<File>().as_mut() else {
        set_last_error("read from a null stream");
        return -1;
    };
    let Some(len) = size.checked_mul(count).filter(|&len| len > 0) else {
        return 0;
    };
    if ptr.is_null() {
        set_last_error("read into a null buffer");
        return -1;
    }
    let buffer = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len);
    let mut total = 0;
    while total < len {
        match file.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                set_last_error(&format!("unable to read ({e})"));
                return -1;
            }
        }
    }
    c_longlong::try_from(total / size).unwrap_or(-1)
}

/// Write `count` items of `size` bytes.
///
/// # Returns
/// The number of items written, `-1` on failure.
///
/// # Safety
/// `ptr` is valid for `size * count` bytes and `stream` is open.
#[no_mangle]
pub unsafe extern "C" fn driver_fwrite(
    ptr: *const c_void,
    size: usize,
    count: usize,
    stream: *mut c_void,
) -> c_longlong {
    let Some(file) = stream.cast::<File>().as_mut() else {
        set_last_error("write to a null stream");
        return -1;
    };
    let Some(len) = size.checked_mul(count).filter(|&len| len > 0) else {
        return 0;
    };
    if ptr.is_null() {
        set_last_error("write from a null buffer");
        return -1;
    }
    let buffer = std::slice::from_raw_parts(ptr.cast::<u8>(), len);
    match file.write_all(buffer) {
        Ok(()) => c_longlong::try_from(count).unwrap_or(-1),
        Err(e) => {
            set_last_error(&format!("unable to write ({e})"));
            -1
        }
    }
}

/// # Safety
/// `stream` came from [`driver_fopen`] and is still open.
#[no_mangle]
pub unsafe extern "C" fn driver_fflush(stream: *mut c_void) -> c_int {
    let Some(file) = stream.cast::<File>().as_mut() else {
        set_last_error("flush of a null stream");
        return EOF;
    };
    match file.flush() {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&format!("unable to flush ({e})"));
            EOF
        }
    }
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_remove(uri: *const c_char) -> c_int {
    uri_path(uri).map_or(FAILURE, |path| {
        outcome(&path, "remove file", fs::remove_file(&path))
    })
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_mkdir(uri: *const c_char) -> c_int {
    uri_path(uri).map_or(FAILURE, |path| {
        outcome(&path, "create directory", fs::create_dir(&path))
    })
}

/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_rmdir(uri: *const c_char) -> c_int {
    uri_path(uri).map_or(FAILURE, |path| {
        outcome(&path, "remove directory", fs::remove_dir(&path))
    })
}

/// Free space of the disk holding `uri`, `-1` if unknown.
///
/// # Safety
/// `uri` is null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn driver_diskFreeSpace(uri: *const c_char) -> c_longlong {
    let Some(path) = uri_path(uri) else {
        return -1;
    };
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());
    match disk {
        Some(disk) => c_longlong::try_from(disk.available_space()).unwrap_or(c_longlong::MAX),
        None => {
            set_last_error(&format!("{}: no disk found", path.display()));
            -1
        }
    }
}

/// # Safety
/// Both arguments are null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn driver_copyToLocal(
    source_uri: *const c_char,
    local_path: *const c_char,
) -> c_int {
    let (Some(source), Some(target)) = (uri_path(source_uri), c_str(local_path)) else {
        return FAILURE;
    };
    let copied = fs::copy(&source, target.as_ref()).map(|_| ());
    outcome(&source, "copy to local", copied)
}

/// # Safety
/// Both arguments are null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn driver_copyFromLocal(
    local_path: *const c_char,
    dest_uri: *const c_char,
) -> c_int {
    let (Some(source), Some(target)) = (c_str(local_path), uri_path(dest_uri)) else {
        return FAILURE;
    };
    let copied = fs::copy(source.as_ref(), &target).map(|_| ());
    outcome(&target, "copy from local", copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &Path) -> CString {
        CString::new(format!("{SCHEME}://localhost{}", path.display())).unwrap()
    }

    fn last_error() -> String {
        unsafe { CStr::from_ptr(driver_getlasterror()) }
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_local_path() {
        assert_eq!(
            local_path("sample://host/tmp/a.txt"),
            Some(PathBuf::from("/tmp/a.txt"))
        );
        assert_eq!(local_path("sample://host"), None);
        assert_eq!(local_path("other://host/tmp/a.txt"), None);
        assert_eq!(local_path("/tmp/a.txt"), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = uri(&dir.path().join("data.txt"));
        unsafe {
            let stream = driver_fopen(file.as_ptr(), b'w' as c_char);
            assert!(!stream.is_null());
            let text = b"hello sample";
            assert_eq!(
                driver_fwrite(text.as_ptr().cast(), 1, text.len(), stream),
                text.len() as c_longlong
            );
            assert_eq!(driver_fflush(stream), 0);
            assert_eq!(driver_fclose(stream), 0);

            assert_eq!(driver_fileExists(file.as_ptr()), SUCCESS);
            assert_eq!(driver_getFileSize(file.as_ptr()), 12);

            let stream = driver_fopen(file.as_ptr(), b'r' as c_char);
            assert_eq!(driver_fseek(stream, 6, SEEK_SET), 0);
            let mut buffer = [0u8; 16];
            let n = driver_fread(buffer.as_mut_ptr().cast(), 1, buffer.len(), stream);
            assert_eq!(n, 6);
            assert_eq!(&buffer[..6], b"sample");
            assert_eq!(driver_fread(buffer.as_mut_ptr().cast(), 1, 4, stream), 0);
            assert_eq!(driver_fclose(stream), 0);
        }
    }

    #[test]
    fn test_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "one\n").unwrap();
        let file = uri(&path);
        unsafe {
            let stream = driver_fopen(file.as_ptr(), b'a' as c_char);
            let text = b"two\n";
            assert_eq!(driver_fwrite(text.as_ptr().cast(), 1, 4, stream), 4);
            assert_eq!(driver_fclose(stream), 0);
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_open_missing_file_sets_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = uri(&dir.path().join("missing.txt"));
        let stream = unsafe { driver_fopen(file.as_ptr(), b'r' as c_char) };
        assert!(stream.is_null());
        assert!(last_error().contains("missing.txt: unable to open"));
        assert_eq!(unsafe { driver_getFileSize(file.as_ptr()) }, -1);
    }

    #[test]
    fn test_directories_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let sub = uri(&dir.path().join("sub"));
        unsafe {
            assert_eq!(driver_dirExists(sub.as_ptr()), FAILURE);
            assert_eq!(driver_mkdir(sub.as_ptr()), SUCCESS);
            assert_eq!(driver_dirExists(sub.as_ptr()), SUCCESS);
            assert_eq!(driver_mkdir(sub.as_ptr()), FAILURE);
            assert_eq!(driver_rmdir(sub.as_ptr()), SUCCESS);
            assert_eq!(driver_dirExists(sub.as_ptr()), FAILURE);
        }
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "x").unwrap();
        let file = uri(&path);
        unsafe {
            assert_eq!(driver_remove(file.as_ptr()), SUCCESS);
            assert_eq!(driver_fileExists(file.as_ptr()), FAILURE);
            assert_eq!(driver_remove(file.as_ptr()), FAILURE);
        }
        assert!(last_error().contains("unable to remove file"));
    }

    #[test]
    fn test_copies() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.txt");
        std::fs::write(&source, "payload").unwrap();
        let local = dir.path().join("local.txt");
        let local_c = CString::new(local.display().to_string()).unwrap();
        unsafe {
            assert_eq!(
                driver_copyToLocal(uri(&source).as_ptr(), local_c.as_ptr()),
                SUCCESS
            );
        }
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "payload");

        let back = dir.path().join("back.txt");
        unsafe {
            assert_eq!(
                driver_copyFromLocal(local_c.as_ptr(), uri(&back).as_ptr()),
                SUCCESS
            );
        }
        assert_eq!(std::fs::read_to_string(&back).unwrap(), "payload");
    }

    #[test]
    fn test_rejects_foreign_uri() {
        let foreign = c"file:///tmp/x";
        assert_eq!(unsafe { driver_fileExists(foreign.as_ptr()) }, FAILURE);
        assert_eq!(last_error(), "file:///tmp/x: not a sample URI");
    }

    #[test]
    fn test_identity() {
        let scheme = unsafe { CStr::from_ptr(driver_getScheme()) };
        assert_eq!(scheme.to_str().unwrap(), SCHEME);
        assert_eq!(driver_isReadOnly(), FAILURE);
        assert_eq!(driver_getSystemPreferredBufferSize(), 4 * 1024 * 1024);
    }
}
