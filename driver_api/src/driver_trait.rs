use std::io::{Read, Write};
use std::path::Path;

use crate::{copy_buffer_size, DriverError, DriverResult, NativeHandle, OpenMode};

/// Capability contract of a storage driver.
///
/// URIs are passed to the driver unchanged, scheme included. The local
/// driver receives plain paths.
///
/// Write-side operations default to [`DriverError::ReadOnly`], so a
/// read-only driver only implements the read side.
pub trait FileDriver: Send + Sync {
    /// Human readable driver name
    fn name(&self) -> &str;

    /// Semantic version, `major.minor.patch`
    fn version(&self) -> &str;

    /// URI scheme served by the driver, empty for the local file system
    fn scheme(&self) -> &str;

    fn is_read_only(&self) -> bool;

    /// Connect to the backend. Connecting a connected driver is a no-op.
    ///
    /// # Errors
    /// Backend unreachable or misconfigured.
    fn connect(&self) -> DriverResult<()>;

    /// Disconnect from the backend. Disconnecting twice is a no-op.
    ///
    /// # Errors
    /// Backend refused to release the connection.
    fn disconnect(&self) -> DriverResult<()>;

    fn is_connected(&self) -> bool;

    /// Buffer size the backend works best with, if it has an opinion.
    fn preferred_buffer_size(&self) -> Option<i64> {
        None
    }

    fn file_exists(&self, uri: &str) -> bool;

    fn dir_exists(&self, uri: &str) -> bool;

    /// # Errors
    /// File missing or backend failure.
    fn file_size(&self, uri: &str) -> DriverResult<u64>;

    /// # Errors
    /// File missing for `OpenMode::Read`, not creatable for write modes.
    fn open(&self, uri: &str, mode: OpenMode) -> DriverResult<NativeHandle>;

    /// Close a handle. The handle is gone whatever the outcome.
    ///
    /// # Errors
    /// Buffered data could not be committed.
    fn close(&self, handle: NativeHandle) -> DriverResult<()>;

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// The buffer is filled completely unless end of file is reached.
    ///
    /// # Returns
    /// Number of bytes read, `0` at end of file.
    ///
    /// # Errors
    /// Backend failure.
    fn read(&self, handle: &NativeHandle, buf: &mut [u8]) -> DriverResult<usize>;

    /// Move the current position to `position` bytes from the start.
    ///
    /// # Errors
    /// Backend failure.
    fn seek(&self, handle: &NativeHandle, position: u64) -> DriverResult<()>;

    /// Text of the last failure recorded by the driver, if any.
    fn last_error_message(&self) -> Option<String>;

    /// Write the whole buffer at the current position.
    ///
    /// # Errors
    /// Backend failure or read-only driver.
    fn write(&self, _handle: &NativeHandle, _buf: &[u8]) -> DriverResult<usize> {
        Err(DriverError::ReadOnly)
    }

    /// # Errors
    /// Backend failure or read-only driver.
    fn flush(&self, _handle: &NativeHandle) -> DriverResult<()> {
        Err(DriverError::ReadOnly)
    }

    /// # Errors
    /// Backend failure or read-only driver.
    fn remove_file(&self, _uri: &str) -> DriverResult<()> {
        Err(DriverError::ReadOnly)
    }

    /// # Errors
    /// Backend failure or read-only driver.
    fn make_directory(&self, _uri: &str) -> DriverResult<()> {
        Err(DriverError::ReadOnly)
    }

    /// # Errors
    /// Backend failure or read-only driver.
    fn remove_directory(&self, _uri: &str) -> DriverResult<()> {
        Err(DriverError::ReadOnly)
    }

    /// Free space, in bytes, of the storage holding `uri`.
    ///
    /// # Errors
    /// Backend failure or read-only driver.
    fn disk_free_space(&self, _uri: &str) -> DriverResult<u64> {
        Err(DriverError::ReadOnly)
    }

    /// Hint that `size` more bytes will be written through `handle`.
    ///
    /// Must not change the length or content of the file as read back.
    ///
    /// # Errors
    /// Backend failure.
    fn reserve_extra_size(&self, _handle: &NativeHandle, _size: u64) -> DriverResult<()> {
        Ok(())
    }

    /// Create a directory and its missing parents.
    ///
    /// # Errors
    /// The first `make_directory` failure.
    fn make_directories(&self, uri: &str) -> DriverResult<()> {
        let uri = uri.trim_end_matches('/');
        let path_start = uri.find("://").map_or(0, |pos| pos + 3);
        let mut ends: Vec<usize> = uri[path_start..]
            .match_indices('/')
            .map(|(pos, _)| path_start + pos)
            .filter(|&pos| pos > path_start)
            .collect();
        ends.push(uri.len());
        for end in ends {
            let prefix = &uri[..end];
            // Skip drive letters such as `C:`
            if prefix.is_empty() || prefix.ends_with(':') {
                continue;
            }
            if !self.dir_exists(prefix) {
                self.make_directory(prefix)?;
            }
        }
        Ok(())
    }

    /// Create or truncate a file to zero length.
    ///
    /// # Errors
    /// Open or close failure.
    fn create_empty_file(&self, uri: &str) -> DriverResult<()> {
        let handle = self.open(uri, OpenMode::Write)?;
        self.close(handle)
    }

    /// Copy a file served by this driver to a local path.
    ///
    /// # Errors
    /// Any read, local write or close failure.
    fn copy_file_to_local(&self, source_uri: &str, local_path: &Path) -> DriverResult<()> {
        copy_to_local_through(self, source_uri, local_path)
    }

    /// Copy a local file to a destination served by this driver.
    ///
    /// # Errors
    /// Any local read, write, flush or close failure.
    fn copy_file_from_local(&self, local_path: &Path, dest_uri: &str) -> DriverResult<()> {
        copy_from_local_through(self, local_path, dest_uri)
    }
}

/// Copy `source_uri` to `local_path` with the driver's read operations.
///
/// # Errors
/// Any read, local write or close failure.
pub fn copy_to_local_through(
    driver: &(impl FileDriver + ?Sized),
    source_uri: &str,
    local_path: &Path,
) -> DriverResult<()> {
    let mut target = std::fs::File::create(local_path)?;
    let handle = driver.open(source_uri, OpenMode::Read)?;
    let mut buffer = vec![0u8; copy_buffer_size(driver.preferred_buffer_size())];
    let copied = loop {
        match driver.read(&handle, &mut buffer) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = target.write_all(&buffer[..n]) {
                    break Err(DriverError::from(e));
                }
            }
            Err(e) => break Err(e),
        }
    };
    let closed = driver.close(handle);
    copied?;
    closed?;
    target.flush()?;
    Ok(())
}

/// Copy `local_path` to `dest_uri` with the driver's write operations.
///
/// # Errors
/// Any local read, write, flush or close failure.
pub fn copy_from_local_through(
    driver: &(impl FileDriver + ?Sized),
    local_path: &Path,
    dest_uri: &str,
) -> DriverResult<()> {
    let mut source = std::fs::File::open(local_path)?;
    let handle = driver.open(dest_uri, OpenMode::Write)?;
    let mut buffer = vec![0u8; copy_buffer_size(driver.preferred_buffer_size())];
    let copied = loop {
        match source.read(&mut buffer) {
            Ok(0) => break driver.flush(&handle),
            Ok(n) => {
                if let Err(e) = driver.write(&handle, &buffer[..n]) {
                    break Err(e);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => break Err(DriverError::from(e)),
        }
    };
    let closed = driver.close(handle);
    copied?;
    closed
}
