//! Driver for the local file system.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use driver_api::{DriverError, DriverResult, FileDriver, NativeHandle, OpenMode};
use parking_lot::Mutex;
use sysinfo::Disks;
use tracing::{debug, warn};

pub const LOCAL_DRIVER_NAME: &str = "Local file driver";

struct LocalHandle {
    file: File,
    path: PathBuf,
    position: u64,
    /// End of the bytes really written, or of the content found at open.
    written_end: u64,
    /// A reservation byte may lie past `written_end`.
    reserved: bool,
}

/// Driver for plain paths, always connected, never read-only.
pub struct LocalDriver {
    handles: Mutex<HashMap<u64, Arc<Mutex<LocalHandle>>>>,
    next_handle: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl LocalDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            last_error: Mutex::new(None),
        }
    }

    fn record(&self, context: &str, err: io::Error) -> DriverError {
        *self.last_error.lock() = Some(format!("{context}: {err}"));
        DriverError::Io(err)
    }

    fn handle(&self, handle: &NativeHandle) -> DriverResult<Arc<Mutex<LocalHandle>>> {
        self.handles
            .lock()
            .get(&handle.id())
            .cloned()
            .ok_or(DriverError::InvalidHandle(handle.id()))
    }
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Free space of the disk whose mount point is the longest prefix of `path`.
fn free_space(path: &Path) -> io::Result<u64> {
    let existing = path
        .ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.exists())
        .unwrap_or_else(|| Path::new("."));
    let canonical = existing.canonicalize()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(sysinfo::Disk::available_space)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mounted disk holds {}", canonical.display()),
            )
        })
}

impl FileDriver for LocalDriver {
    fn name(&self) -> &str {
        LOCAL_DRIVER_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn scheme(&self) -> &str {
        ""
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn connect(&self) -> DriverResult<()> {
        Ok(())
    }

    fn disconnect(&self) -> DriverResult<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn file_exists(&self, uri: &str) -> bool {
        Path::new(uri).is_file()
    }

    fn dir_exists(&self, uri: &str) -> bool {
        Path::new(uri).is_dir()
    }

    fn file_size(&self, uri: &str) -> DriverResult<u64> {
        std::fs::metadata(uri)
            .map(|metadata| metadata.len())
            .map_err(|e| self.record(uri, e))
    }

    fn open(&self, uri: &str, mode: OpenMode) -> DriverResult<NativeHandle> {
        let opened = match mode {
            OpenMode::Read => File::open(uri),
            OpenMode::Write => File::create(uri),
            // Not O_APPEND: reservations need positioned writes
            OpenMode::Append => OpenOptions::new().write(true).create(true).open(uri),
        };
        let mut file = opened.map_err(|e| self.record(uri, e))?;
        let position = match mode {
            OpenMode::Append => file.seek(SeekFrom::End(0)).map_err(|e| self.record(uri, e))?,
            _ => 0,
        };
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        debug!(path = uri, %mode, id, "local open");
        self.handles.lock().insert(
            id,
            Arc::new(Mutex::new(LocalHandle {
                file,
                path: PathBuf::from(uri),
                position,
                written_end: position,
                reserved: false,
            })),
        );
        Ok(NativeHandle::new(id))
    }

    fn close(&self, handle: NativeHandle) -> DriverResult<()> {
        let Some(state) = self.handles.lock().remove(&handle.id()) else {
            return Err(DriverError::InvalidHandle(handle.id()));
        };
        let mut state = state.lock();
        let path = state.path.display().to_string();
        state.file.flush().map_err(|e| self.record(&path, e))?;
        if state.reserved {
            let length = state
                .file
                .metadata()
                .map_err(|e| self.record(&path, e))?
                .len();
            if length > state.written_end {
                debug!(path = %path, length, logical = state.written_end, "dropping unused reservation");
                let logical = state.written_end;
                state.file.set_len(logical).map_err(|e| self.record(&path, e))?;
            }
        }
        debug!(path = %path, id = handle.id(), "local close");
        Ok(())
    }

    fn read(&self, handle: &NativeHandle, buf: &mut [u8]) -> DriverResult<usize> {
        let state = self.handle(handle)?;
        let mut state = state.lock();
        let state = &mut *state;
        let count = read_full(&mut state.file, buf)
            .map_err(|e| self.record(&state.path.display().to_string(), e))?;
        state.position += count as u64;
        Ok(count)
    }

    fn seek(&self, handle: &NativeHandle, position: u64) -> DriverResult<()> {
        let state = self.handle(handle)?;
        let mut state = state.lock();
        let state = &mut *state;
        state.position = state
            .file
            .seek(SeekFrom::Start(position))
            .map_err(|e| self.record(&state.path.display().to_string(), e))?;
        Ok(())
    }

    fn last_error_message(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn write(&self, handle: &NativeHandle, buf: &[u8]) -> DriverResult<usize> {
        let state = self.handle(handle)?;
        let mut state = state.lock();
        let state = &mut *state;
        state
            .file
            .write_all(buf)
            .map_err(|e| self.record(&state.path.display().to_string(), e))?;
        state.position += buf.len() as u64;
        state.written_end = state.written_end.max(state.position);
        Ok(buf.len())
    }

    fn flush(&self, handle: &NativeHandle) -> DriverResult<()> {
        let state = self.handle(handle)?;
        let mut state = state.lock();
        let state = &mut *state;
        state
            .file
            .flush()
            .map_err(|e| self.record(&state.path.display().to_string(), e))
    }

    fn remove_file(&self, uri: &str) -> DriverResult<()> {
        std::fs::remove_file(uri).map_err(|e| self.record(uri, e))
    }

    fn make_directory(&self, uri: &str) -> DriverResult<()> {
        std::fs::create_dir(uri).map_err(|e| self.record(uri, e))
    }

    fn remove_directory(&self, uri: &str) -> DriverResult<()> {
        std::fs::remove_dir(uri).map_err(|e| self.record(uri, e))
    }

    fn make_directories(&self, uri: &str) -> DriverResult<()> {
        std::fs::create_dir_all(uri).map_err(|e| self.record(uri, e))
    }

    fn disk_free_space(&self, uri: &str) -> DriverResult<u64> {
        free_space(Path::new(uri)).map_err(|e| self.record(uri, e))
    }

    /// Write one byte at `position + size - 1` and come back, so that the
    /// file system allocates the whole range at once. Nothing is written
    /// when the range ends inside the existing content.
    fn reserve_extra_size(&self, handle: &NativeHandle, size: u64) -> DriverResult<()> {
        if size == 0 {
            return Ok(());
        }
        let state = self.handle(handle)?;
        let mut state = state.lock();
        let state = &mut *state;
        let path = state.path.display().to_string();
        let last = state.position + size - 1;
        let length = state
            .file
            .metadata()
            .map_err(|e| self.record(&path, e))?
            .len();
        if last < length {
            return Ok(());
        }
        let reserved = state
            .file
            .seek(SeekFrom::Start(last))
            .and_then(|_| state.file.write_all(&[0]))
            .and_then(|()| state.file.seek(SeekFrom::Start(state.position)));
        if let Err(e) = reserved {
            warn!(path = %path, size, error = %e, "reservation failed");
            return Err(self.record(&path, e));
        }
        state.reserved = true;
        Ok(())
    }

    fn copy_file_to_local(&self, source_uri: &str, local_path: &Path) -> DriverResult<()> {
        std::fs::copy(source_uri, local_path)
            .map(|_| ())
            .map_err(|e| self.record(source_uri, e))
    }

    fn copy_file_from_local(&self, local_path: &Path, dest_uri: &str) -> DriverResult<()> {
        std::fs::copy(local_path, dest_uri)
            .map(|_| ())
            .map_err(|e| self.record(dest_uri, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name).display().to_string();
        (dir, path)
    }

    #[test]
    fn test_write_read_seek() {
        let (_dir, path) = scratch("a.txt");
        let driver = LocalDriver::new();
        let handle = driver.open(&path, OpenMode::Write).unwrap();
        driver.write(&handle, b"0123456789").unwrap();
        driver.close(handle).unwrap();

        let handle = driver.open(&path, OpenMode::Read).unwrap();
        driver.seek(&handle, 4).unwrap();
        let mut buf = [0u8; 16];
        let n = driver.read(&handle, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"456789");
        assert_eq!(driver.read(&handle, &mut buf).unwrap(), 0);
        driver.close(handle).unwrap();
        assert_eq!(driver.file_size(&path).unwrap(), 10);
    }

    #[test]
    fn test_append_writes_after_content() {
        let (_dir, path) = scratch("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        let driver = LocalDriver::new();
        let handle = driver.open(&path, OpenMode::Append).unwrap();
        driver.write(&handle, b"def").unwrap();
        driver.close(handle).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_reservation_is_invisible() {
        let (_dir, path) = scratch("r.bin");
        let driver = LocalDriver::new();
        let handle = driver.open(&path, OpenMode::Write).unwrap();
        driver.write(&handle, b"head").unwrap();
        driver.reserve_extra_size(&handle, 1 << 20).unwrap();
        driver.write(&handle, b"tail").unwrap();
        driver.close(handle).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"headtail");
    }

    #[test]
    fn test_reservation_fully_used() {
        let (_dir, path) = scratch("r.bin");
        let driver = LocalDriver::new();
        let handle = driver.open(&path, OpenMode::Write).unwrap();
        driver.reserve_extra_size(&handle, 4096).unwrap();
        let data = vec![7u8; 4096];
        driver.write(&handle, &data).unwrap();
        driver.close(handle).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_missing_file_records_last_error() {
        let (_dir, path) = scratch("missing.txt");
        let driver = LocalDriver::new();
        assert!(driver.open(&path, OpenMode::Read).is_err());
        assert!(driver.last_error_message().unwrap().contains("missing.txt"));
    }

    #[test]
    fn test_directories() {
        let (_dir, path) = scratch("x");
        let driver = LocalDriver::new();
        let nested = format!("{path}/y/z");
        driver.make_directories(&nested).unwrap();
        assert!(driver.dir_exists(&nested));
        driver.remove_directory(&nested).unwrap();
        assert!(!driver.dir_exists(&nested));
    }

    #[test]
    fn test_disk_free_space() {
        let (dir, _path) = scratch("x");
        let driver = LocalDriver::new();
        let free = driver.disk_free_space(&dir.path().display().to_string());
        // Containers may hide their mounts from sysinfo
        if let Ok(free) = free {
            assert!(free > 0);
        }
    }

    #[test]
    fn test_closed_handle_is_invalid() {
        let (_dir, path) = scratch("a.txt");
        let driver = LocalDriver::new();
        let handle = driver.open(&path, OpenMode::Write).unwrap();
        let id = handle.id();
        driver.close(handle).unwrap();
        let stale = NativeHandle::new(id);
        assert!(matches!(
            driver.write(&stale, b"x"),
            Err(DriverError::InvalidHandle(_))
        ));
    }
}
