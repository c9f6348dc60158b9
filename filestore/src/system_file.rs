//! Owning file handle.

use std::sync::Arc;

use driver_api::{
    FileDriver, NativeHandle, OpenMode, DEFAULT_PREFERRED_BUFFER_SIZE, MAX_PREFERRED_BUFFER_SIZE,
    MB, MIN_PREFERRED_BUFFER_SIZE,
};
use tracing::{span::EnteredSpan, trace_span, warn};

use crate::error::FileError;
use crate::registry::{DriverRegistry, RegistryError};

/// Smallest reservation forwarded to the driver.
pub const RESERVE_THRESHOLD: i64 = MB as i64;

/// Clamp a driver buffer size hint into `[1 MiB, 64 MiB]`.
///
/// No hint, zero or a negative value gives the 8 MiB default.
#[must_use]
pub fn clamp_preferred_buffer_size(hint: Option<i64>) -> usize {
    let size = match hint {
        Some(size) if size > 0 => size
            .unsigned_abs()
            .clamp(MIN_PREFERRED_BUFFER_SIZE, MAX_PREFERRED_BUFFER_SIZE),
        _ => DEFAULT_PREFERRED_BUFFER_SIZE,
    };
    usize::try_from(size).unwrap_or(usize::MAX)
}

/// Span around one driver call; its enter and exit events time the call.
pub(crate) fn driver_span(driver: &dyn FileDriver, operation: &'static str) -> EnteredSpan {
    trace_span!("driver", name = driver.name(), operation).entered()
}

struct OpenFile {
    driver: Arc<dyn FileDriver>,
    handle: NativeHandle,
    mode: OpenMode,
}

/// One file opened through the registry.
///
/// The handle is open for reading or for writing, never both. Writes keep
/// two counters that drive the pre-reservation of file space:
/// `requested_extra_size` (largest announced size) and
/// `reserved_extra_size` (bytes reserved but not yet written).
pub struct SystemFile {
    registry: Arc<DriverRegistry>,
    open: Option<OpenFile>,
    uri: String,
    requested_extra_size: i64,
    reserved_extra_size: i64,
}

impl SystemFile {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            open: None,
            uri: String::new(),
            requested_extra_size: 0,
            reserved_extra_size: 0,
        }
    }

    /// # Errors
    /// Empty name, no driver for the scheme, or the driver failed to open.
    ///
    /// # Panics
    /// If the handle is already open.
    pub fn open_input(&mut self, uri: &str) -> Result<(), FileError> {
        self.open_with(uri, OpenMode::Read, "open input file")
    }

    /// Create or truncate `uri` for writing.
    ///
    /// # Errors
    /// Same as [`SystemFile::open_input`], plus read-only drivers.
    ///
    /// # Panics
    /// If the handle is already open.
    pub fn open_output(&mut self, uri: &str) -> Result<(), FileError> {
        self.open_with(uri, OpenMode::Write, "open output file")
    }

    /// # Errors
    /// Same as [`SystemFile::open_output`].
    ///
    /// # Panics
    /// If the handle is already open.
    pub fn open_output_for_append(&mut self, uri: &str) -> Result<(), FileError> {
        self.open_with(uri, OpenMode::Append, "open output file for append")
    }

    fn open_with(
        &mut self,
        uri: &str,
        mode: OpenMode,
        operation: &'static str,
    ) -> Result<(), FileError> {
        assert!(self.open.is_none(), "{}: file already open", self.uri);
        if uri.is_empty() {
            return Err(FileError::MissingFileName);
        }
        let driver = if mode.is_write() {
            self.registry.resolve_for_write(uri, operation)?
        } else {
            self.registry.resolve(uri)?
        };
        let handle = {
            let _span = driver_span(driver.as_ref(), "open");
            driver.open(uri, mode)
        }
        .map_err(|source| FileError::Open {
            uri: uri.to_string(),
            source,
        })?;
        self.uri = uri.to_string();
        self.requested_extra_size = 0;
        self.reserved_extra_size = 0;
        self.open = Some(OpenFile {
            driver,
            handle,
            mode,
        });
        Ok(())
    }

    /// Close the file, flushing it first when open for writing.
    ///
    /// Closing a closed handle does nothing.
    ///
    /// # Errors
    /// Flush or close failure. The handle is closed in any case.
    pub fn close(&mut self) -> Result<(), FileError> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        let _span = driver_span(open.driver.as_ref(), "close");
        let flushed = if open.mode.is_write() {
            open.driver
                .flush(&open.handle)
                .map_err(|source| FileError::io(&self.uri, "flush", source))
        } else {
            Ok(())
        };
        if self.reserved_extra_size > 0 {
            warn!(
                uri = %self.uri,
                reserved = self.reserved_extra_size,
                "file closed with unused reserved space"
            );
        }
        self.requested_extra_size = 0;
        self.reserved_extra_size = 0;
        let closed = open
            .driver
            .close(open.handle)
            .map_err(|source| FileError::io(&self.uri, "close", source));
        flushed.and(closed)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    #[must_use]
    pub fn is_open_for_read(&self) -> bool {
        matches!(&self.open, Some(open) if !open.mode.is_write())
    }

    #[must_use]
    pub fn is_open_for_write(&self) -> bool {
        matches!(&self.open, Some(open) if open.mode.is_write())
    }

    /// Name of the last opened file
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn opened(&self) -> Result<&OpenFile, FileError> {
        self.open.as_ref().ok_or_else(|| FileError::NotOpen {
            uri: self.uri.clone(),
        })
    }

    /// Read at the current position.
    ///
    /// # Returns
    /// Bytes read, fewer than `buf.len()` only at end of file.
    ///
    /// # Errors
    /// Closed handle or driver failure.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        let open = self.opened()?;
        let _span = driver_span(open.driver.as_ref(), "read");
        open.driver
            .read(&open.handle, buf)
            .map_err(|source| FileError::io(&self.uri, "read", source))
    }

    /// Write the whole buffer.
    ///
    /// # Errors
    /// Closed handle, driver failure, or short write.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), FileError> {
        let written_size = i64::try_from(buf.len()).unwrap_or(i64::MAX);
        self.requested_extra_size -= written_size;
        self.reserved_extra_size -= written_size;
        let open = self.opened()?;
        let _span = driver_span(open.driver.as_ref(), "write");
        let written = open
            .driver
            .write(&open.handle, buf)
            .map_err(|source| FileError::io(&self.uri, "write", source))?;
        if written != buf.len() {
            return Err(FileError::ShortWrite {
                uri: self.uri.clone(),
                written,
                requested: buf.len(),
            });
        }
        Ok(())
    }

    /// # Errors
    /// Closed handle or driver failure.
    pub fn seek(&mut self, position: u64) -> Result<(), FileError> {
        let open = self.opened()?;
        let _span = driver_span(open.driver.as_ref(), "seek");
        open.driver
            .seek(&open.handle, position)
            .map_err(|source| FileError::io(&self.uri, "seek", source))
    }

    /// # Errors
    /// Closed handle or driver failure.
    pub fn flush(&mut self) -> Result<(), FileError> {
        let open = self.opened()?;
        let _span = driver_span(open.driver.as_ref(), "flush");
        open.driver
            .flush(&open.handle)
            .map_err(|source| FileError::io(&self.uri, "flush", source))
    }

    /// Announce that `size` bytes are about to be written.
    ///
    /// Requests accumulate as a maximum. Once nothing is left reserved and
    /// the request reaches 1 MiB, the driver reserves the whole request.
    /// Ignored unless the file is open for writing.
    ///
    /// # Errors
    /// Driver failure.
    pub fn reserve_extra_size(&mut self, size: u64) -> Result<(), FileError> {
        let Some(open) = self.open.as_ref().filter(|open| open.mode.is_write()) else {
            return Ok(());
        };
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        self.requested_extra_size = self.requested_extra_size.max(size);
        if self.reserved_extra_size <= 0 && self.requested_extra_size >= RESERVE_THRESHOLD {
            self.reserved_extra_size = self.requested_extra_size;
            let _span = driver_span(open.driver.as_ref(), "reserve");
            open.driver
                .reserve_extra_size(&open.handle, self.requested_extra_size.unsigned_abs())
                .map_err(|source| FileError::io(&self.uri, "reserve extra size", source))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn requested_extra_size(&self) -> i64 {
        self.requested_extra_size
    }

    #[must_use]
    pub fn reserved_extra_size(&self) -> i64 {
        self.reserved_extra_size
    }

    /// Size of the open file
    ///
    /// # Errors
    /// Closed handle or driver failure.
    pub fn file_size(&self) -> Result<u64, FileError> {
        let open = self.opened()?;
        let _span = driver_span(open.driver.as_ref(), "file size");
        open.driver
            .file_size(&self.uri)
            .map_err(|source| FileError::io(&self.uri, "get file size", source))
    }

    /// Buffer size preferred by the driver of the open file, clamped.
    #[must_use]
    pub fn preferred_buffer_size(&self) -> usize {
        clamp_preferred_buffer_size(
            self.open
                .as_ref()
                .and_then(|open| open.driver.preferred_buffer_size()),
        )
    }

    /// Buffer size preferred by the driver serving `uri`, clamped.
    ///
    /// # Errors
    /// No driver for the scheme, or connection failure.
    pub fn preferred_buffer_size_for(
        registry: &DriverRegistry,
        uri: &str,
    ) -> Result<usize, RegistryError> {
        let driver = registry.resolve(uri)?;
        Ok(clamp_preferred_buffer_size(driver.preferred_buffer_size()))
    }

    #[must_use]
    pub fn last_error_message(&self) -> Option<String> {
        self.open
            .as_ref()
            .and_then(|open| open.driver.last_error_message())
    }
}

impl Drop for SystemFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(uri = %self.uri, error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use driver_mocked::MemDriver;

    fn registry_with(driver: Arc<MemDriver>) -> Arc<DriverRegistry> {
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));
        registry.register(driver).unwrap();
        registry
    }

    #[test]
    fn test_clamp_preferred_buffer_size() {
        assert_eq!(clamp_preferred_buffer_size(None), 8 * 1024 * 1024);
        assert_eq!(clamp_preferred_buffer_size(Some(0)), 8 * 1024 * 1024);
        assert_eq!(clamp_preferred_buffer_size(Some(-1)), 8 * 1024 * 1024);
        assert_eq!(clamp_preferred_buffer_size(Some(1 << 40)), 64 * 1024 * 1024);
        assert_eq!(clamp_preferred_buffer_size(Some(10 * 1024)), 1024 * 1024);
        assert_eq!(
            clamp_preferred_buffer_size(Some(3 * 1024 * 1024)),
            3 * 1024 * 1024
        );
    }

    #[test]
    fn test_open_state_is_exclusive() {
        let driver = Arc::new(MemDriver::new("mem"));
        let mut file = SystemFile::new(registry_with(driver));
        file.open_output("mem://host/a").unwrap();
        assert!(file.is_open_for_write());
        assert!(!file.is_open_for_read());
        file.close().unwrap();
        file.open_input("mem://host/a").unwrap();
        assert!(file.is_open_for_read());
        assert!(!file.is_open_for_write());
        file.close().unwrap();
        assert!(!file.is_open());
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn test_double_open_panics() {
        let driver = Arc::new(MemDriver::new("mem"));
        driver.add_file("mem://host/a", b"x");
        let mut file = SystemFile::new(registry_with(driver));
        file.open_input("mem://host/a").unwrap();
        let _ = file.open_input("mem://host/a");
    }

    #[test]
    fn test_missing_file_name() {
        let driver = Arc::new(MemDriver::new("mem"));
        let mut file = SystemFile::new(registry_with(driver));
        assert!(matches!(
            file.open_input(""),
            Err(FileError::MissingFileName)
        ));
    }

    #[test]
    fn test_open_failure_carries_driver_message() {
        let driver = Arc::new(MemDriver::new("mem"));
        let mut file = SystemFile::new(registry_with(driver));
        let err = file.open_input("mem://host/missing").err().unwrap();
        assert_eq!(
            err.to_string(),
            "mem://host/missing: unable to open file (mem://host/missing: no such file)"
        );
        assert!(!file.is_open());
    }

    #[test]
    fn test_read_only_scheme_refuses_output() {
        let driver = Arc::new(MemDriver::new("ro").read_only());
        let mut file = SystemFile::new(registry_with(driver));
        let err = file.open_output("ro://host/a").err().unwrap();
        assert!(matches!(
            err,
            FileError::Registry(RegistryError::ReadOnlyScheme { .. })
        ));
    }

    #[test]
    fn test_reservation_bookkeeping() {
        let driver = Arc::new(MemDriver::new("mem"));
        let mut file = SystemFile::new(registry_with(driver.clone()));
        file.open_output("mem://host/a").unwrap();

        file.reserve_extra_size(1000).unwrap();
        assert_eq!(file.reserved_extra_size(), 0);
        assert!(driver.reservations().is_empty());

        let two_mb = 2 * 1024 * 1024;
        file.reserve_extra_size(two_mb).unwrap();
        assert_eq!(file.reserved_extra_size(), 2 * 1024 * 1024);
        assert_eq!(driver.reservations(), vec![two_mb]);

        let chunk = vec![b'x'; 1024 * 1024];
        file.write(&chunk).unwrap();
        file.reserve_extra_size(two_mb).unwrap();
        assert_eq!(driver.reservations().len(), 1);
        file.write(&chunk).unwrap();
        assert_eq!(file.reserved_extra_size(), 0);
        assert_eq!(file.requested_extra_size(), 1024 * 1024);
        file.close().unwrap();
        assert_eq!(driver.get_file("mem://host/a").unwrap().len(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_closed_handle_refuses_io() {
        let driver = Arc::new(MemDriver::new("mem"));
        let mut file = SystemFile::new(registry_with(driver));
        let mut buf = [0u8; 4];
        assert!(matches!(
            file.read(&mut buf),
            Err(FileError::NotOpen { .. })
        ));
    }

    #[test]
    fn test_drop_closes_handle() {
        let driver = Arc::new(MemDriver::new("mem"));
        {
            let mut file = SystemFile::new(registry_with(driver.clone()));
            file.open_output("mem://host/a").unwrap();
            file.write(b"data").unwrap();
        }
        assert_eq!(driver.open_handle_count(), 0);
        assert_eq!(driver.get_file("mem://host/a").unwrap(), b"data");
    }

    #[test]
    fn test_preferred_buffer_size_follows_driver() {
        let driver = Arc::new(MemDriver::new("mem").with_preferred_buffer_size(16 * 1024 * 1024));
        let registry = registry_with(driver);
        assert_eq!(
            SystemFile::preferred_buffer_size_for(&registry, "mem://host/a").unwrap(),
            16 * 1024 * 1024
        );
        assert_eq!(
            SystemFile::preferred_buffer_size_for(&registry, "/tmp/a").unwrap(),
            8 * 1024 * 1024
        );
    }
}
