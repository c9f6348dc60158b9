//! C ABI of dynamically loaded drivers.
//!
//! A driver library exports the functions below with C linkage. The host
//! resolves them once at load time:
//!
//! ```text
//!   MANDATORY_SYMBOLS  always required
//!   WRITE_SYMBOLS      required unless driver_isReadOnly() returns 1
//!   OPTIONAL_SYMBOLS   used when present
//! ```
//!
//! Return conventions:
//! - queries and `connect`/`disconnect`/`remove`/`mkdir`/`rmdir`/copies: `1` on success
//! - `fclose`, `fseek`, `fflush`: `0` on success
//! - `fread`, `fwrite`: bytes transferred, `-1` on failure
//! - `fopen`: null on failure
//! - `getFileSize`, `diskFreeSpace`: `-1` on failure

use std::os::raw::{c_char, c_int, c_longlong, c_void};

pub type StringFn = unsafe extern "C" fn() -> *const c_char;
pub type FlagFn = unsafe extern "C" fn() -> c_int;
pub type PathFlagFn = unsafe extern "C" fn(*const c_char) -> c_int;
pub type PathSizeFn = unsafe extern "C" fn(*const c_char) -> c_longlong;
pub type FopenFn = unsafe extern "C" fn(*const c_char, c_char) -> *mut c_void;
pub type StreamFn = unsafe extern "C" fn(*mut c_void) -> c_int;
pub type FseekFn = unsafe extern "C" fn(*mut c_void, c_longlong, c_int) -> c_int;
pub type FreadFn = unsafe extern "C" fn(*mut c_void, usize, usize, *mut c_void) -> c_longlong;
pub type FwriteFn = unsafe extern "C" fn(*const c_void, usize, usize, *mut c_void) -> c_longlong;
pub type CopyFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
pub type SizeFn = unsafe extern "C" fn() -> c_longlong;

pub const SUCCESS: c_int = 1;
pub const FAILURE: c_int = 0;
pub const EOF: c_int = -1;
pub const SEEK_SET: c_int = 0;

pub const DRIVER_GET_DRIVER_NAME: &str = "driver_getDriverName";
pub const DRIVER_GET_VERSION: &str = "driver_getVersion";
pub const DRIVER_GET_SCHEME: &str = "driver_getScheme";
pub const DRIVER_IS_READ_ONLY: &str = "driver_isReadOnly";
pub const DRIVER_CONNECT: &str = "driver_connect";
pub const DRIVER_DISCONNECT: &str = "driver_disconnect";
pub const DRIVER_IS_CONNECTED: &str = "driver_isConnected";
pub const DRIVER_FILE_EXISTS: &str = "driver_fileExists";
pub const DRIVER_DIR_EXISTS: &str = "driver_dirExists";
pub const DRIVER_GET_FILE_SIZE: &str = "driver_getFileSize";
pub const DRIVER_FOPEN: &str = "driver_fopen";
pub const DRIVER_FCLOSE: &str = "driver_fclose";
pub const DRIVER_FSEEK: &str = "driver_fseek";
pub const DRIVER_FREAD: &str = "driver_fread";
pub const DRIVER_GET_LAST_ERROR: &str = "driver_getlasterror";

pub const DRIVER_FWRITE: &str = "driver_fwrite";
pub const DRIVER_FFLUSH: &str = "driver_fflush";
pub const DRIVER_REMOVE: &str = "driver_remove";
pub const DRIVER_MKDIR: &str = "driver_mkdir";
pub const DRIVER_RMDIR: &str = "driver_rmdir";
pub const DRIVER_DISK_FREE_SPACE: &str = "driver_diskFreeSpace";

pub const DRIVER_COPY_TO_LOCAL: &str = "driver_copyToLocal";
pub const DRIVER_COPY_FROM_LOCAL: &str = "driver_copyFromLocal";
pub const DRIVER_GET_PREFERRED_BUFFER_SIZE: &str = "driver_getSystemPreferredBufferSize";

pub const MANDATORY_SYMBOLS: [&str; 15] = [
    DRIVER_GET_DRIVER_NAME,
    DRIVER_GET_VERSION,
    DRIVER_GET_SCHEME,
    DRIVER_IS_READ_ONLY,
    DRIVER_CONNECT,
    DRIVER_DISCONNECT,
    DRIVER_IS_CONNECTED,
    DRIVER_FILE_EXISTS,
    DRIVER_DIR_EXISTS,
    DRIVER_GET_FILE_SIZE,
    DRIVER_FOPEN,
    DRIVER_FCLOSE,
    DRIVER_FSEEK,
    DRIVER_FREAD,
    DRIVER_GET_LAST_ERROR,
];

pub const WRITE_SYMBOLS: [&str; 6] = [
    DRIVER_FWRITE,
    DRIVER_FFLUSH,
    DRIVER_REMOVE,
    DRIVER_MKDIR,
    DRIVER_RMDIR,
    DRIVER_DISK_FREE_SPACE,
];

pub const OPTIONAL_SYMBOLS: [&str; 3] = [
    DRIVER_COPY_TO_LOCAL,
    DRIVER_COPY_FROM_LOCAL,
    DRIVER_GET_PREFERRED_BUFFER_SIZE,
];
