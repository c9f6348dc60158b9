//! Path-level file services.
//!
//! Each call resolves the driver for its URI and forwards. Services that
//! modify the storage refuse read-only schemes before reaching the driver.

use std::path::Path;

use driver_api::DriverError;

use crate::error::FileError;
use crate::registry::DriverRegistry;
use crate::system_file::{clamp_preferred_buffer_size, driver_span};

fn failed<'a>(
    uri: &'a str,
    operation: &'static str,
) -> impl FnOnce(DriverError) -> FileError + 'a {
    move |source| FileError::io(uri, operation, source)
}

impl DriverRegistry {
    /// `false` also when no driver serves the scheme.
    #[must_use]
    pub fn file_exists(&self, uri: &str) -> bool {
        self.resolve(uri).is_ok_and(|driver| {
            let _span = driver_span(driver.as_ref(), "file exists");
            driver.file_exists(uri)
        })
    }

    #[must_use]
    pub fn dir_exists(&self, uri: &str) -> bool {
        self.resolve(uri).is_ok_and(|driver| {
            let _span = driver_span(driver.as_ref(), "dir exists");
            driver.dir_exists(uri)
        })
    }

    /// # Errors
    /// Resolution failure, missing file.
    pub fn file_size(&self, uri: &str) -> Result<u64, FileError> {
        let driver = self.resolve(uri)?;
        let _span = driver_span(driver.as_ref(), "file size");
        driver
            .file_size(uri)
            .map_err(failed(uri, "get file size"))
    }

    /// # Errors
    /// Resolution failure, read-only scheme, or driver failure.
    pub fn remove_file(&self, uri: &str) -> Result<(), FileError> {
        let driver = self.resolve_for_write(uri, "remove file")?;
        let _span = driver_span(driver.as_ref(), "remove file");
        driver.remove_file(uri).map_err(failed(uri, "remove file"))
    }

    /// # Errors
    /// Resolution failure, read-only scheme, or driver failure.
    pub fn make_directory(&self, uri: &str) -> Result<(), FileError> {
        let driver = self.resolve_for_write(uri, "make directory")?;
        let _span = driver_span(driver.as_ref(), "make directory");
        driver
            .make_directory(uri)
            .map_err(failed(uri, "make directory"))
    }

    /// Create `uri` and every missing parent.
    ///
    /// # Errors
    /// Resolution failure, read-only scheme, or driver failure.
    pub fn make_directories(&self, uri: &str) -> Result<(), FileError> {
        let driver = self.resolve_for_write(uri, "make directories")?;
        let _span = driver_span(driver.as_ref(), "make directories");
        driver
            .make_directories(uri)
            .map_err(failed(uri, "make directories"))
    }

    /// # Errors
    /// Resolution failure, read-only scheme, or driver failure.
    pub fn remove_directory(&self, uri: &str) -> Result<(), FileError> {
        let driver = self.resolve_for_write(uri, "remove directory")?;
        let _span = driver_span(driver.as_ref(), "remove directory");
        driver
            .remove_directory(uri)
            .map_err(failed(uri, "remove directory"))
    }

    /// # Errors
    /// Resolution failure, read-only scheme, or driver failure.
    pub fn create_empty_file(&self, uri: &str) -> Result<(), FileError> {
        let driver = self.resolve_for_write(uri, "create empty file")?;
        let _span = driver_span(driver.as_ref(), "create empty file");
        driver
            .create_empty_file(uri)
            .map_err(failed(uri, "create empty file"))
    }

    /// Free space, in bytes, of the storage holding `uri`.
    ///
    /// # Errors
    /// Resolution failure, read-only scheme, or driver failure.
    pub fn disk_free_space(&self, uri: &str) -> Result<u64, FileError> {
        let driver = self.resolve_for_write(uri, "disk free space")?;
        let _span = driver_span(driver.as_ref(), "disk free space");
        driver
            .disk_free_space(uri)
            .map_err(failed(uri, "get disk free space"))
    }

    /// Download `source_uri` to the local file `local_path`.
    ///
    /// # Errors
    /// Resolution failure or copy failure.
    pub fn copy_file_to_local(&self, source_uri: &str, local_path: &Path) -> Result<(), FileError> {
        let driver = self.resolve(source_uri)?;
        let _span = driver_span(driver.as_ref(), "copy to local");
        driver
            .copy_file_to_local(source_uri, local_path)
            .map_err(failed(source_uri, "copy to local"))
    }

    /// Upload the local file `local_path` to `destination_uri`.
    ///
    /// # Errors
    /// Resolution failure, read-only scheme, or copy failure.
    pub fn copy_file_from_local(
        &self,
        local_path: &Path,
        destination_uri: &str,
    ) -> Result<(), FileError> {
        let driver = self.resolve_for_write(destination_uri, "copy from local")?;
        let _span = driver_span(driver.as_ref(), "copy from local");
        driver
            .copy_file_from_local(local_path, destination_uri)
            .map_err(failed(destination_uri, "copy from local"))
    }

    /// Buffer size to use with `uri`, clamped; the default when unresolvable.
    #[must_use]
    pub fn preferred_buffer_size(&self, uri: &str) -> usize {
        clamp_preferred_buffer_size(
            self.resolve(uri)
                .ok()
                .and_then(|driver| driver.preferred_buffer_size()),
        )
    }
}
