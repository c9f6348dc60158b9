/// In-memory storage driver.
///
/// - `add_file` adds a file to the virtual file system.
/// - `get_file` gets the content of a file.
/// - `WANT_ERROR` in a URI makes `open` and `file_size` fail.
/// - `WANT_ERROR` in file content makes `read` fail when it reaches it.
/// - `set_write_budget` makes writes fail once the budget is spent.
/// - `set_fail_connect` makes `connect` fail.
///
/// Every call records itself in the driver statistics so that tests can
/// check how the engine drives the backend.
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use driver_api::{DriverError, DriverResult, FileDriver, NativeHandle, OpenMode};
use parking_lot::Mutex;

pub const WANT_ERROR: char = '\u{0001}';

/// Free space reported by default.
pub const DEFAULT_FREE_SPACE: u64 = 1 << 40;

struct MemHandle {
    uri: String,
    pos: usize,
    mode: OpenMode,
}

pub struct MemDriver {
    name: String,
    version: String,
    scheme: String,
    read_only: bool,
    preferred_buffer_size: Option<i64>,
    free_space: AtomicU64,
    files: Mutex<HashMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    handles: Mutex<HashMap<u64, MemHandle>>,
    next_handle: AtomicU64,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    connect_count: AtomicUsize,
    disconnect_count: AtomicUsize,
    write_budget: Mutex<Option<usize>>,
    reservations: Mutex<Vec<u64>>,
    last_error: Mutex<Option<String>>,
}

impl MemDriver {
    #[must_use]
    pub fn new(scheme: &str) -> Self {
        Self {
            name: format!("Mocked driver for {scheme}"),
            version: "0.1.0".to_string(),
            scheme: scheme.to_string(),
            read_only: false,
            preferred_buffer_size: None,
            free_space: AtomicU64::new(DEFAULT_FREE_SPACE),
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connect_count: AtomicUsize::new(0),
            disconnect_count: AtomicUsize::new(0),
            write_budget: Mutex::new(None),
            reservations: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn with_preferred_buffer_size(mut self, size: i64) -> Self {
        self.preferred_buffer_size = Some(size);
        self
    }

    pub fn add_file(&self, uri: &str, content: &[u8]) {
        self.files.lock().insert(uri.to_string(), content.to_vec());
    }

    pub fn add_dir(&self, uri: &str) {
        self.dirs.lock().insert(uri.to_string());
    }

    #[must_use]
    pub fn get_file(&self, uri: &str) -> Option<Vec<u8>> {
        self.files.lock().get(uri).cloned()
    }

    /// Names of all files, sorted
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn open_handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.disconnect_count.load(Ordering::Relaxed)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Allow `budget` more written bytes, then fail every write.
    /// `None` removes the limit.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        *self.write_budget.lock() = budget;
    }

    pub fn set_free_space(&self, bytes: u64) {
        self.free_space.store(bytes, Ordering::Relaxed);
    }

    /// Sizes passed to `reserve_extra_size`, in call order
    #[must_use]
    pub fn reservations(&self) -> Vec<u64> {
        self.reservations.lock().clone()
    }

    fn fail<T>(&self, message: String) -> DriverResult<T> {
        *self.last_error.lock() = Some(message.clone());
        Err(DriverError::Failed(message))
    }

    fn check_writable(&self) -> DriverResult<()> {
        if self.read_only {
            *self.last_error.lock() = Some(format!("{} is read-only", self.scheme));
            return Err(DriverError::ReadOnly);
        }
        Ok(())
    }
}

impl FileDriver for MemDriver {
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
        if self.fail_connect.load(Ordering::Relaxed) {
            return self.fail(format!("cannot connect to {}", self.scheme));
        }
        if !self.connected.swap(true, Ordering::Relaxed) {
            self.connect_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn disconnect(&self) -> DriverResult<()> {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn preferred_buffer_size(&self) -> Option<i64> {
        self.preferred_buffer_size
    }

    fn file_exists(&self, uri: &str) -> bool {
        self.files.lock().contains_key(uri)
    }

    fn dir_exists(&self, uri: &str) -> bool {
        let uri = uri.trim_end_matches('/');
        if self.dirs.lock().contains(uri) {
            return true;
        }
        let prefix = format!("{uri}/");
        self.files.lock().keys().any(|name| name.starts_with(&prefix))
    }

    fn file_size(&self, uri: &str) -> DriverResult<u64> {
        if uri.contains(WANT_ERROR) {
            return self.fail(format!("{uri}: injected error"));
        }
        match self.files.lock().get(uri) {
            Some(content) => Ok(content.len() as u64),
            None => self.fail(format!("{uri}: no such file")),
        }
    }

    fn open(&self, uri: &str, mode: OpenMode) -> DriverResult<NativeHandle> {
        if uri.contains(WANT_ERROR) {
            return self.fail(format!("{uri}: injected error"));
        }
        let pos = {
            let mut files = self.files.lock();
            match mode {
                OpenMode::Read => match files.get(uri) {
                    Some(_) => 0,
                    None => return self.fail(format!("{uri}: no such file")),
                },
                OpenMode::Write => {
                    self.check_writable()?;
                    files.insert(uri.to_string(), Vec::new());
                    0
                }
                OpenMode::Append => {
                    self.check_writable()?;
                    files.entry(uri.to_string()).or_default().len()
                }
            }
        };
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(
            id,
            MemHandle {
                uri: uri.to_string(),
                pos,
                mode,
            },
        );
        Ok(NativeHandle::new(id))
    }

    fn close(&self, handle: NativeHandle) -> DriverResult<()> {
        match self.handles.lock().remove(&handle.id()) {
            Some(_) => Ok(()),
            None => Err(DriverError::InvalidHandle(handle.id())),
        }
    }

    fn read(&self, handle: &NativeHandle, buf: &mut [u8]) -> DriverResult<usize> {
        let files = self.files.lock();
        let mut handles = self.handles.lock();
        let Some(state) = handles.get_mut(&handle.id()) else {
            return Err(DriverError::InvalidHandle(handle.id()));
        };
        let Some(content) = files.get(&state.uri) else {
            return Err(DriverError::InvalidHandle(handle.id()));
        };
        let available = content.get(state.pos..).unwrap_or_default();
        let count = available.len().min(buf.len());
        let chunk = &available[..count];
        if chunk.contains(&(WANT_ERROR as u8)) {
            let message = format!("{}: injected read error", state.uri);
            drop(handles);
            drop(files);
            return self.fail(message);
        }
        buf[..count].copy_from_slice(chunk);
        state.pos += count;
        Ok(count)
    }

    fn seek(&self, handle: &NativeHandle, position: u64) -> DriverResult<()> {
        let mut handles = self.handles.lock();
        let Some(state) = handles.get_mut(&handle.id()) else {
            return Err(DriverError::InvalidHandle(handle.id()));
        };
        state.pos = usize::try_from(position)
            .map_err(|_| DriverError::failed(format!("seek position {position} out of range")))?;
        Ok(())
    }

    fn last_error_message(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn write(&self, handle: &NativeHandle, buf: &[u8]) -> DriverResult<usize> {
        self.check_writable()?;
        {
            let mut budget = self.write_budget.lock();
            if let Some(remaining) = budget.as_mut() {
                if buf.len() > *remaining {
                    *remaining = 0;
                    drop(budget);
                    return self.fail("injected write failure".to_string());
                }
                *remaining -= buf.len();
            }
        }
        let mut files = self.files.lock();
        let mut handles = self.handles.lock();
        let Some(state) = handles.get_mut(&handle.id()) else {
            return Err(DriverError::InvalidHandle(handle.id()));
        };
        if !state.mode.is_write() {
            return Err(DriverError::failed(format!("{}: not open for writing", state.uri)));
        }
        let content = files.entry(state.uri.clone()).or_default();
        let end = state.pos + buf.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[state.pos..end].copy_from_slice(buf);
        state.pos = end;
        Ok(buf.len())
    }

    fn flush(&self, handle: &NativeHandle) -> DriverResult<()> {
        self.check_writable()?;
        if self.handles.lock().contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(DriverError::InvalidHandle(handle.id()))
        }
    }

    fn remove_file(&self, uri: &str) -> DriverResult<()> {
        self.check_writable()?;
        if self.files.lock().remove(uri).is_some() {
            Ok(())
        } else {
            self.fail(format!("{uri}: no such file"))
        }
    }

    fn make_directory(&self, uri: &str) -> DriverResult<()> {
        self.check_writable()?;
        if self.dirs.lock().insert(uri.trim_end_matches('/').to_string()) {
            Ok(())
        } else {
            self.fail(format!("{uri}: directory exists"))
        }
    }

    fn remove_directory(&self, uri: &str) -> DriverResult<()> {
        self.check_writable()?;
        if self.dirs.lock().remove(uri.trim_end_matches('/')) {
            Ok(())
        } else {
            self.fail(format!("{uri}: no such directory"))
        }
    }

    fn disk_free_space(&self, _uri: &str) -> DriverResult<u64> {
        self.check_writable()?;
        Ok(self.free_space.load(Ordering::Relaxed))
    }

    fn reserve_extra_size(&self, handle: &NativeHandle, size: u64) -> DriverResult<()> {
        if !self.handles.lock().contains_key(&handle.id()) {
            return Err(DriverError::InvalidHandle(handle.id()));
        }
        self.reservations.lock().push(size);
        Ok(())
    }
}
