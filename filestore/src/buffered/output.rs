//! Buffered writer.

use std::sync::Arc;

use tracing::warn;

use super::{BufferedFile, BufferedFileCore};
use crate::cache::ByteCache;
use crate::error::FileError;
use crate::registry::DriverRegistry;

/// Accumulates output in the cache and writes it out whenever it is full.
pub struct OutputBufferedFile {
    core: BufferedFileCore,
}

impl OutputBufferedFile {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            core: BufferedFileCore::new(registry),
        }
    }

    /// Copy the settings of `other`, not its file or buffer.
    pub fn copy_from(&mut self, other: &OutputBufferedFile) {
        self.core.copy_from(&other.core);
    }

    /// Open for appending at the end of an existing file.
    ///
    /// # Errors
    /// The file could not be opened. The failure is also reported.
    pub fn open_for_append(&mut self) -> Result<(), FileError> {
        self.core
            .open_handle(|handle, file_name| handle.open_output_for_append(file_name))?;
        self.allocate()
    }

    fn allocate(&mut self) -> Result<(), FileError> {
        self.core.current_buffer_size = 0;
        self.core.allocated_buffer_size = self.core.buffer_size().max(1);
        if let Err(e) = self.core.allocate_buffer() {
            if let Err(closed) = self.core.close_handle() {
                warn!(
                    uri = %self.core.file_name(),
                    error = %closed,
                    "close after allocation failure"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Write the buffered bytes to the file.
    ///
    /// # Errors
    /// Write failure. It is reported and the file enters the error state.
    pub fn flush(&mut self) -> Result<(), FileError> {
        let size = self.core.current_buffer_size;
        if size == 0 {
            return Ok(());
        }
        let written = match self.core.handle.as_mut() {
            Some(handle) => self.core.cache.write_to_file(handle, size),
            None => Err(FileError::NotOpen {
                uri: self.core.file_name.clone(),
            }),
        };
        self.core.current_buffer_size = 0;
        if let Err(e) = &written {
            self.core.is_error = true;
            self.core.add_error(&e.to_string());
        }
        written
    }

    /// # Errors
    /// A flush triggered by a full buffer failed.
    pub fn write(&mut self, mut data: &[u8]) -> Result<(), FileError> {
        while !data.is_empty() {
            let free = self.core.allocated_buffer_size - self.core.current_buffer_size;
            if free == 0 {
                self.flush()?;
                continue;
            }
            let count = free.min(data.len());
            self.core
                .cache
                .write_at(self.core.current_buffer_size, &data[..count]);
            self.core.current_buffer_size += count;
            data = &data[count..];
        }
        Ok(())
    }

    /// # Errors
    /// Same as [`OutputBufferedFile::write`].
    pub fn write_str(&mut self, text: &str) -> Result<(), FileError> {
        self.write(text.as_bytes())
    }

    /// # Errors
    /// Same as [`OutputBufferedFile::write`].
    pub fn write_char(&mut self, c: u8) -> Result<(), FileError> {
        self.write(&[c])
    }

    /// Write a field, quoted if it contains the separator, a double quote
    /// or an end of line. Quotes inside a quoted field are doubled.
    ///
    /// # Errors
    /// Same as [`OutputBufferedFile::write`].
    pub fn write_field(&mut self, field: &str) -> Result<(), FileError> {
        let separator = char::from(self.core.field_separator());
        if !field.contains([separator, '"', '\n', '\r']) {
            return self.write_str(field);
        }
        self.write_char(b'"')?;
        for (i, part) in field.split('"').enumerate() {
            if i > 0 {
                self.write(b"\"\"")?;
            }
            self.write_str(part)?;
        }
        self.write_char(b'"')
    }

    /// # Errors
    /// Same as [`OutputBufferedFile::write`].
    pub fn write_eol(&mut self) -> Result<(), FileError> {
        self.write_char(b'\n')
    }

    /// Write `len` bytes of `source` starting at `begin`.
    ///
    /// # Errors
    /// Same as [`OutputBufferedFile::write`].
    ///
    /// # Panics
    /// If the range exceeds the length of `source`.
    pub fn write_sub_part(
        &mut self,
        source: &ByteCache,
        begin: usize,
        len: usize,
    ) -> Result<(), FileError> {
        for segment in source.slices(begin, begin + len) {
            self.write(segment)?;
        }
        Ok(())
    }
}

impl BufferedFile for OutputBufferedFile {
    fn core(&self) -> &BufferedFileCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BufferedFileCore {
        &mut self.core
    }

    fn open(&mut self) -> Result<(), FileError> {
        self.core
            .open_handle(|handle, file_name| handle.open_output(file_name))?;
        self.allocate()
    }

    /// Flush then close. The file is closed even if the flush fails.
    fn close(&mut self) -> Result<(), FileError> {
        let flushed = if self.core.is_error {
            Ok(())
        } else {
            self.flush()
        };
        let closed = self.core.close_handle();
        self.core.reset_buffer();
        flushed.and(closed)
    }
}

impl Drop for OutputBufferedFile {
    fn drop(&mut self) {
        if self.core.is_opened {
            if let Err(e) = self.close() {
                warn!(uri = %self.core.file_name(), error = %e, "close on drop failed");
            }
        }
    }
}
