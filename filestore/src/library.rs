//! Drivers loaded from shared libraries.
//!
//! ```text
//!   file ──libloading──► LoadedLibrary ──SymbolSource──► bind()
//!                                                        │
//!          ReadTable (mandatory)  ◄──────────────────────┤
//!          WriteTable (unless read-only) ◄───────────────┤
//!          OptionalTable ◄───────────────────────────────┘
//! ```
//!
//! Binding resolves every symbol once; a missing mandatory symbol aborts the
//! binding and drops the library. The bound [`LibraryDriver`] then forwards
//! each [`FileDriver`] call through the typed tables.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use driver_api::ffi::{
    self, CopyFn, FlagFn, FopenFn, FreadFn, FseekFn, FwriteFn, PathFlagFn, PathSizeFn, SizeFn,
    StreamFn, StringFn,
};
use driver_api::{
    copy_from_local_through, copy_to_local_through, major_version, DriverError, DriverResult,
    FileDriver, NativeHandle, OpenMode, SUPPORTED_MAJOR_VERSION,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Error type for driver library binding
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("{library}: unable to load library ({message})")]
    Load { library: String, message: String },

    #[error("{library}: unable to load function {symbol} from library")]
    MissingSymbol {
        library: String,
        symbol: &'static str,
    },

    #[error("{library}: {symbol} returned an invalid string")]
    InvalidString {
        library: String,
        symbol: &'static str,
    },

    #[error(
        "{library}: the driver major version must be {expected} (current version is {found})"
    )]
    VersionMismatch {
        library: String,
        expected: u32,
        found: String,
    },
}

/// Where exported symbols are looked up.
pub trait SymbolSource: Send + Sync {
    /// Address of the exported symbol `name`, if present.
    fn address(&self, name: &str) -> Option<*mut c_void>;
}

/// A shared library opened with `libloading`.
pub struct LoadedLibrary(libloading::Library);

impl LoadedLibrary {
    /// # Errors
    /// The library cannot be opened.
    pub fn open(path: &Path) -> Result<Self, libloading::Error> {
        // SAFETY: driver libraries run no initialisation code with
        // preconditions beyond being loaded once per path.
        unsafe { libloading::Library::new(path) }.map(Self)
    }
}

impl SymbolSource for LoadedLibrary {
    fn address(&self, name: &str) -> Option<*mut c_void> {
        // SAFETY: the symbol is read as a plain address, never called here.
        let symbol = unsafe { self.0.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        Some(*symbol)
    }
}

fn resolve<F: Copy>(
    source: &dyn SymbolSource,
    library: &str,
    symbol: &'static str,
) -> Result<F, BindError> {
    resolve_optional(source, symbol).ok_or_else(|| BindError::MissingSymbol {
        library: library.to_string(),
        symbol,
    })
}

fn resolve_optional<F: Copy>(source: &dyn SymbolSource, symbol: &'static str) -> Option<F> {
    assert_eq!(
        std::mem::size_of::<F>(),
        std::mem::size_of::<*mut c_void>(),
        "{symbol} must be resolved as a function pointer"
    );
    let address = source.address(symbol).filter(|address| !address.is_null())?;
    // SAFETY: F is one of the `driver_api::ffi` function pointer types and
    // the exported symbol implements that signature.
    Some(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&address) })
}

fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: drivers return NUL-terminated strings that stay valid until
    // their next call.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[derive(Clone, Copy)]
struct ReadTable {
    get_driver_name: StringFn,
    get_version: StringFn,
    get_scheme: StringFn,
    is_read_only: FlagFn,
    connect: FlagFn,
    disconnect: FlagFn,
    is_connected: FlagFn,
    file_exists: PathFlagFn,
    dir_exists: PathFlagFn,
    get_file_size: PathSizeFn,
    fopen: FopenFn,
    fclose: StreamFn,
    fseek: FseekFn,
    fread: FreadFn,
    get_last_error: StringFn,
}

impl ReadTable {
    fn resolve(source: &dyn SymbolSource, library: &str) -> Result<Self, BindError> {
        Ok(Self {
            get_driver_name: resolve(source, library, ffi::DRIVER_GET_DRIVER_NAME)?,
            get_version: resolve(source, library, ffi::DRIVER_GET_VERSION)?,
            get_scheme: resolve(source, library, ffi::DRIVER_GET_SCHEME)?,
            is_read_only: resolve(source, library, ffi::DRIVER_IS_READ_ONLY)?,
            connect: resolve(source, library, ffi::DRIVER_CONNECT)?,
            disconnect: resolve(source, library, ffi::DRIVER_DISCONNECT)?,
            is_connected: resolve(source, library, ffi::DRIVER_IS_CONNECTED)?,
            file_exists: resolve(source, library, ffi::DRIVER_FILE_EXISTS)?,
            dir_exists: resolve(source, library, ffi::DRIVER_DIR_EXISTS)?,
            get_file_size: resolve(source, library, ffi::DRIVER_GET_FILE_SIZE)?,
            fopen: resolve(source, library, ffi::DRIVER_FOPEN)?,
            fclose: resolve(source, library, ffi::DRIVER_FCLOSE)?,
            fseek: resolve(source, library, ffi::DRIVER_FSEEK)?,
            fread: resolve(source, library, ffi::DRIVER_FREAD)?,
            get_last_error: resolve(source, library, ffi::DRIVER_GET_LAST_ERROR)?,
        })
    }
}

#[derive(Clone, Copy)]
struct WriteTable {
    fwrite: FwriteFn,
    fflush: StreamFn,
    remove: PathFlagFn,
    mkdir: PathFlagFn,
    rmdir: PathFlagFn,
    disk_free_space: PathSizeFn,
}

impl WriteTable {
    fn resolve(source: &dyn SymbolSource, library: &str) -> Result<Self, BindError> {
        Ok(Self {
            fwrite: resolve(source, library, ffi::DRIVER_FWRITE)?,
            fflush: resolve(source, library, ffi::DRIVER_FFLUSH)?,
            remove: resolve(source, library, ffi::DRIVER_REMOVE)?,
            mkdir: resolve(source, library, ffi::DRIVER_MKDIR)?,
            rmdir: resolve(source, library, ffi::DRIVER_RMDIR)?,
            disk_free_space: resolve(source, library, ffi::DRIVER_DISK_FREE_SPACE)?,
        })
    }
}

#[derive(Clone, Copy)]
struct OptionalTable {
    copy_to_local: Option<CopyFn>,
    copy_from_local: Option<CopyFn>,
    preferred_buffer_size: Option<SizeFn>,
}

impl OptionalTable {
    fn resolve(source: &dyn SymbolSource) -> Self {
        Self {
            copy_to_local: resolve_optional(source, ffi::DRIVER_COPY_TO_LOCAL),
            copy_from_local: resolve_optional(source, ffi::DRIVER_COPY_FROM_LOCAL),
            preferred_buffer_size: resolve_optional(source, ffi::DRIVER_GET_PREFERRED_BUFFER_SIZE),
        }
    }
}

/// Driver bound to the C symbols of a shared library.
pub struct LibraryDriver {
    library: String,
    name: String,
    version: String,
    scheme: String,
    read_only: bool,
    read: ReadTable,
    write: Option<WriteTable>,
    optional: OptionalTable,
    /// Open streams by handle id, as addresses
    streams: Mutex<HashMap<u64, usize>>,
    next_handle: AtomicU64,
    // Declared last: the tables above point into it
    _source: Box<dyn SymbolSource>,
}

impl LibraryDriver {
    /// Load and bind a driver library.
    ///
    /// # Errors
    /// The library cannot be opened, a required symbol is missing, or the
    /// major version is not supported.
    pub fn load(path: &Path) -> Result<Self, BindError> {
        let library = path.display().to_string();
        let loaded = LoadedLibrary::open(path).map_err(|e| BindError::Load {
            library: library.clone(),
            message: e.to_string(),
        })?;
        Self::bind(Box::new(loaded), &library)
    }

    /// Bind a driver from an arbitrary symbol source.
    ///
    /// On failure `source` is dropped, which unloads a real library.
    ///
    /// # Arguments
    /// * `source` - Where to look up the `driver_*` symbols
    /// * `library` - Name used in error messages
    ///
    /// # Errors
    /// A required symbol is missing, a driver string is invalid, or the
    /// major version is not supported.
    pub fn bind(source: Box<dyn SymbolSource>, library: &str) -> Result<Self, BindError> {
        let read = ReadTable::resolve(source.as_ref(), library)?;
        let text = |getter: StringFn, symbol: &'static str| {
            // SAFETY: resolved from the driver with the `StringFn` signature
            owned_string(unsafe { getter() }).ok_or_else(|| BindError::InvalidString {
                library: library.to_string(),
                symbol,
            })
        };
        let name = text(read.get_driver_name, ffi::DRIVER_GET_DRIVER_NAME)?;
        let version = text(read.get_version, ffi::DRIVER_GET_VERSION)?;
        let scheme = text(read.get_scheme, ffi::DRIVER_GET_SCHEME)?;
        // SAFETY: resolved with the `FlagFn` signature
        let read_only = unsafe { (read.is_read_only)() } == ffi::SUCCESS;
        let write = if read_only {
            None
        } else {
            Some(WriteTable::resolve(source.as_ref(), library)?)
        };
        let optional = OptionalTable::resolve(source.as_ref());

        if major_version(&version) != Some(SUPPORTED_MAJOR_VERSION) {
            return Err(BindError::VersionMismatch {
                library: library.to_string(),
                expected: SUPPORTED_MAJOR_VERSION,
                found: version,
            });
        }

        debug!(library, name = %name, version = %version, scheme = %scheme, read_only, "driver library bound");
        Ok(Self {
            library: library.to_string(),
            name,
            version,
            scheme,
            read_only,
            read,
            write,
            optional,
            streams: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            _source: source,
        })
    }

    /// Name of the library the driver was bound from
    #[must_use]
    pub fn library(&self) -> &str {
        &self.library
    }

    fn failure(&self) -> DriverError {
        DriverError::Failed(
            self.last_error_message()
                .unwrap_or_else(|| format!("{} reported an unknown error", self.name)),
        )
    }

    fn write_table(&self) -> DriverResult<&WriteTable> {
        self.write.as_ref().ok_or(DriverError::ReadOnly)
    }

    fn stream(&self, handle: &NativeHandle) -> DriverResult<*mut c_void> {
        self.streams
            .lock()
            .get(&handle.id())
            .map(|&address| address as *mut c_void)
            .ok_or(DriverError::InvalidHandle(handle.id()))
    }

    fn path_flag(&self, function: PathFlagFn, uri: &str) -> DriverResult<bool> {
        let path = c_path(uri)?;
        // SAFETY: `path` is a valid C string for the duration of the call
        Ok(unsafe { function(path.as_ptr()) } == ffi::SUCCESS)
    }

    fn path_success(&self, function: PathFlagFn, uri: &str) -> DriverResult<()> {
        if self.path_flag(function, uri)? {
            Ok(())
        } else {
            Err(self.failure())
        }
    }

    fn path_size(&self, function: PathSizeFn, uri: &str) -> DriverResult<u64> {
        let path = c_path(uri)?;
        // SAFETY: `path` is a valid C string for the duration of the call
        let size = unsafe { function(path.as_ptr()) };
        u64::try_from(size).map_err(|_| self.failure())
    }
}

fn c_path(uri: &str) -> DriverResult<CString> {
    CString::new(uri).map_err(|_| DriverError::failed(format!("{uri}: NUL byte in file name")))
}

impl Drop for LibraryDriver {
    fn drop(&mut self) {
        let leaked: Vec<u64> = self.streams.lock().keys().copied().collect();
        for id in leaked {
            warn!(library = %self.library, id, "closing stream left open");
            if let Err(e) = self.close(NativeHandle::new(id)) {
                warn!(library = %self.library, error = %e, "close failed");
            }
        }
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!(library = %self.library, error = %e, "disconnect failed");
            }
        }
        debug!(library = %self.library, "driver library released");
    }
}

impl FileDriver for LibraryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn connect(&self) -> DriverResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        // SAFETY: resolved with the `FlagFn` signature
        if unsafe { (self.read.connect)() } == ffi::SUCCESS {
            Ok(())
        } else {
            Err(self.failure())
        }
    }

    fn disconnect(&self) -> DriverResult<()> {
        // SAFETY: resolved with the `FlagFn` signature
        if unsafe { (self.read.disconnect)() } == ffi::SUCCESS {
            Ok(())
        } else {
            Err(self.failure())
        }
    }

    fn is_connected(&self) -> bool {
        // SAFETY: resolved with the `FlagFn` signature
        (unsafe { (self.read.is_connected)() }) == ffi::SUCCESS
    }

    fn preferred_buffer_size(&self) -> Option<i64> {
        // SAFETY: resolved with the `SizeFn` signature
        self.optional
            .preferred_buffer_size
            .map(|function| unsafe { function() })
    }

    fn file_exists(&self, uri: &str) -> bool {
        self.path_flag(self.read.file_exists, uri).unwrap_or(false)
    }

    fn dir_exists(&self, uri: &str) -> bool {
        self.path_flag(self.read.dir_exists, uri).unwrap_or(false)
    }

    fn file_size(&self, uri: &str) -> DriverResult<u64> {
        self.path_size(self.read.get_file_size, uri)
    }

    fn open(&self, uri: &str, mode: OpenMode) -> DriverResult<NativeHandle> {
        if mode.is_write() {
            self.write_table()?;
        }
        let path = c_path(uri)?;
        #[allow(clippy::cast_possible_wrap)]
        let mode_char = mode.as_char() as c_char;
        // SAFETY: `path` is a valid C string for the duration of the call
        let stream = unsafe { (self.read.fopen)(path.as_ptr(), mode_char) };
        if stream.is_null() {
            return Err(self.failure());
        }
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, stream as usize);
        Ok(NativeHandle::new(id))
    }

    fn close(&self, handle: NativeHandle) -> DriverResult<()> {
        let Some(address) = self.streams.lock().remove(&handle.id()) else {
            return Err(DriverError::InvalidHandle(handle.id()));
        };
        // SAFETY: `address` came from `fopen` and is closed once
        if unsafe { (self.read.fclose)(address as *mut c_void) } == 0 {
            Ok(())
        } else {
            Err(self.failure())
        }
    }

    fn read(&self, handle: &NativeHandle, buf: &mut [u8]) -> DriverResult<usize> {
        let stream = self.stream(handle)?;
        let mut total = 0;
        while total < buf.len() {
            let rest = &mut buf[total..];
            // SAFETY: `rest` is valid for `rest.len()` bytes, `stream` is open
            let count = unsafe {
                (self.read.fread)(rest.as_mut_ptr().cast::<c_void>(), 1, rest.len(), stream)
            };
            let count = usize::try_from(count).map_err(|_| self.failure())?;
            if count == 0 {
                break;
            }
            total += count;
        }
        Ok(total)
    }

    fn seek(&self, handle: &NativeHandle, position: u64) -> DriverResult<()> {
        let stream = self.stream(handle)?;
        let offset = i64::try_from(position)
            .map_err(|_| DriverError::failed(format!("seek position {position} out of range")))?;
        // SAFETY: `stream` is open
        if unsafe { (self.read.fseek)(stream, offset, ffi::SEEK_SET) } == 0 {
            Ok(())
        } else {
            Err(self.failure())
        }
    }

    fn last_error_message(&self) -> Option<String> {
        // SAFETY: resolved with the `StringFn` signature
        owned_string(unsafe { (self.read.get_last_error)() }).filter(|text| !text.is_empty())
    }

    fn write(&self, handle: &NativeHandle, buf: &[u8]) -> DriverResult<usize> {
        let table = self.write_table()?;
        let stream = self.stream(handle)?;
        // SAFETY: `buf` is valid for `buf.len()` bytes, `stream` is open
        let count =
            unsafe { (table.fwrite)(buf.as_ptr().cast::<c_void>(), 1, buf.len(), stream) };
        usize::try_from(count).map_err(|_| self.failure())
    }

    fn flush(&self, handle: &NativeHandle) -> DriverResult<()> {
        let table = self.write_table()?;
        let stream = self.stream(handle)?;
        // SAFETY: `stream` is open
        if unsafe { (table.fflush)(stream) } == ffi::EOF {
            Err(self.failure())
        } else {
            Ok(())
        }
    }

    fn remove_file(&self, uri: &str) -> DriverResult<()> {
        let table = self.write_table()?;
        self.path_success(table.remove, uri)
    }

    fn make_directory(&self, uri: &str) -> DriverResult<()> {
        let table = self.write_table()?;
        self.path_success(table.mkdir, uri)
    }

    fn remove_directory(&self, uri: &str) -> DriverResult<()> {
        let table = self.write_table()?;
        self.path_success(table.rmdir, uri)
    }

    fn disk_free_space(&self, uri: &str) -> DriverResult<u64> {
        let table = self.write_table()?;
        self.path_size(table.disk_free_space, uri)
    }

    fn copy_file_to_local(&self, source_uri: &str, local_path: &Path) -> DriverResult<()> {
        let Some(function) = self.optional.copy_to_local else {
            return copy_to_local_through(self, source_uri, local_path);
        };
        let source = c_path(source_uri)?;
        let target = c_path(&local_path.display().to_string())?;
        // SAFETY: both paths are valid C strings for the duration of the call
        if unsafe { function(source.as_ptr(), target.as_ptr()) } == ffi::SUCCESS {
            Ok(())
        } else {
            Err(self.failure())
        }
    }

    fn copy_file_from_local(&self, local_path: &Path, dest_uri: &str) -> DriverResult<()> {
        self.write_table()?;
        let Some(function) = self.optional.copy_from_local else {
            return copy_from_local_through(self, local_path, dest_uri);
        };
        let source = c_path(&local_path.display().to_string())?;
        let target = c_path(dest_uri)?;
        // SAFETY: both paths are valid C strings for the duration of the call
        if unsafe { function(source.as_ptr(), target.as_ptr()) } == ffi::SUCCESS {
            Ok(())
        } else {
            Err(self.failure())
        }
    }
}
