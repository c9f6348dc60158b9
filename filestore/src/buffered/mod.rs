//! Buffered access to huge files.
//!
//! A buffered file binds one [`ByteCache`] to one [`SystemFile`]. The reader
//! fills the cache with whole lines taken from any position of the file; the
//! writer accumulates output in the cache and flushes it block by block.
//!
//! ```text
//!   file  ──fill(pos)──►  ByteCache  ──next_field()──►  caller
//!   file  ◄──flush()───  ByteCache  ◄──write()───────  caller
//! ```

pub mod input;
pub mod output;

pub use input::{Field, FieldError, InputBufferedFile, DEFAULT_MAX_LINE_LENGTH, MAX_FIELD_LENGTH};
pub use output::OutputBufferedFile;

use std::sync::Arc;

use driver_api::DEFAULT_PREFERRED_BUFFER_SIZE;

use crate::cache::ByteCache;
use crate::error::FileError;
use crate::registry::DriverRegistry;
use crate::report::{Reporter, Severity, TracingReporter};
use crate::system_file::SystemFile;

/// Buffer size used until the caller chooses one.
pub const DEFAULT_BUFFER_SIZE: usize = DEFAULT_PREFERRED_BUFFER_SIZE as usize;

pub const DEFAULT_FIELD_SEPARATOR: u8 = b'\t';

/// State shared by the reader and the writer.
///
/// `buffer_size` is what the caller asked for, `allocated_buffer_size` what
/// the cache currently holds, `current_buffer_size` how much of it is used.
pub struct BufferedFileCore {
    registry: Arc<DriverRegistry>,
    file_name: String,
    header_line_used: bool,
    field_separator: u8,
    buffer_size: usize,
    pub(crate) allocated_buffer_size: usize,
    pub(crate) current_buffer_size: usize,
    preferred_buffer_size: usize,
    pub(crate) cache: ByteCache,
    pub(crate) handle: Option<SystemFile>,
    pub(crate) is_opened: bool,
    pub(crate) is_error: bool,
    silent: bool,
    reporter: Arc<dyn Reporter>,
}

impl BufferedFileCore {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            file_name: String::new(),
            header_line_used: true,
            field_separator: DEFAULT_FIELD_SEPARATOR,
            buffer_size: DEFAULT_BUFFER_SIZE,
            allocated_buffer_size: 0,
            current_buffer_size: 0,
            preferred_buffer_size: DEFAULT_BUFFER_SIZE,
            cache: ByteCache::new(),
            handle: None,
            is_opened: false,
            is_error: false,
            silent: false,
            reporter: Arc::new(TracingReporter),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Set the URI and negotiate the preferred buffer size with its driver.
    ///
    /// # Panics
    /// If the file is open.
    pub fn set_file_name(&mut self, file_name: &str) {
        assert!(!self.is_opened, "{}: file is open", self.file_name);
        self.file_name = file_name.to_string();
        self.preferred_buffer_size = self.registry.preferred_buffer_size(file_name);
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn set_header_line_used(&mut self, used: bool) {
        self.header_line_used = used;
    }

    #[must_use]
    pub fn header_line_used(&self) -> bool {
        self.header_line_used
    }

    pub fn set_field_separator(&mut self, separator: u8) {
        self.field_separator = separator;
    }

    #[must_use]
    pub fn field_separator(&self) -> u8 {
        self.field_separator
    }

    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size;
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn allocated_buffer_size(&self) -> usize {
        self.allocated_buffer_size
    }

    /// Bytes of the buffer holding file content
    #[must_use]
    pub fn current_buffer_size(&self) -> usize {
        self.current_buffer_size
    }

    /// Buffer size preferred by the driver of the file, clamped
    #[must_use]
    pub fn preferred_buffer_size(&self) -> usize {
        self.preferred_buffer_size
    }

    #[must_use]
    pub fn cache(&self) -> &ByteCache {
        &self.cache
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.is_opened
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Silent mode drops every report.
    pub fn set_silent_mode(&mut self, silent: bool) {
        self.silent = silent;
    }

    #[must_use]
    pub fn is_silent_mode(&self) -> bool {
        self.silent
    }

    pub fn set_reporter(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporter = reporter;
    }

    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Size the cache to `allocated_buffer_size`, keeping its content.
    ///
    /// # Errors
    /// Allocation failure. It is reported and the file enters the error state.
    pub fn allocate_buffer(&mut self) -> Result<(), FileError> {
        if let Err(e) = self.cache.try_resize(self.allocated_buffer_size) {
            self.is_error = true;
            self.add_error(&e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// Shrink the cache to `allocated_buffer_size` and release spare memory.
    ///
    /// Buffered content is never dropped: the target is raised to the
    /// current buffer size if needed.
    pub fn prune_buffer(&mut self) {
        self.allocated_buffer_size = self.allocated_buffer_size.max(self.current_buffer_size);
        if self.allocated_buffer_size < self.cache.len() {
            self.cache.resize(self.allocated_buffer_size);
        }
        self.cache.shrink_to_fit();
    }

    /// Empty the buffer and free its memory.
    pub fn reset_buffer(&mut self) {
        self.cache.clear();
        self.allocated_buffer_size = 0;
        self.current_buffer_size = 0;
    }

    /// Memory held by the file, buffer included.
    #[must_use]
    pub fn used_memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.file_name.capacity() + self.cache.capacity()
    }

    /// Copy the settings of `other`. Neither its file nor its buffer.
    pub fn copy_from(&mut self, other: &BufferedFileCore) {
        self.registry = other.registry.clone();
        self.file_name.clone_from(&other.file_name);
        self.header_line_used = other.header_line_used;
        self.field_separator = other.field_separator;
        self.buffer_size = other.buffer_size;
        self.preferred_buffer_size = other.preferred_buffer_size;
        self.silent = other.silent;
        self.reporter = other.reporter.clone();
    }

    fn report(&self, severity: Severity, text: &str) {
        if !self.silent {
            self.reporter.report(severity, &self.file_name, text);
        }
    }

    pub fn add_simple_message(&self, text: &str) {
        self.report(Severity::SimpleMessage, text);
    }

    pub fn add_message(&self, text: &str) {
        self.report(Severity::Message, text);
    }

    pub fn add_warning(&self, text: &str) {
        self.report(Severity::Warning, text);
    }

    pub fn add_error(&self, text: &str) {
        self.report(Severity::Error, text);
    }

    /// Open the handle with `open`, reporting failures.
    pub(crate) fn open_handle(
        &mut self,
        open: impl FnOnce(&mut SystemFile, &str) -> Result<(), FileError>,
    ) -> Result<(), FileError> {
        assert!(!self.is_opened, "{}: file already open", self.file_name);
        let mut handle = SystemFile::new(self.registry.clone());
        match open(&mut handle, &self.file_name) {
            Ok(()) => {
                self.handle = Some(handle);
                self.is_opened = true;
                self.is_error = false;
                Ok(())
            }
            Err(e) => {
                self.is_error = true;
                self.add_error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Close the handle, reporting failures. The file is closed either way.
    pub(crate) fn close_handle(&mut self) -> Result<(), FileError> {
        let closed = match self.handle.take() {
            Some(mut handle) => handle.close(),
            None => Ok(()),
        };
        self.is_opened = false;
        if let Err(e) = &closed {
            self.add_error(&e.to_string());
        }
        closed
    }

    pub(crate) fn handle_mut(&mut self) -> Result<&mut SystemFile, FileError> {
        self.handle.as_mut().ok_or_else(|| FileError::NotOpen {
            uri: self.file_name.clone(),
        })
    }
}

/// Common face of the reader and the writer.
pub trait BufferedFile {
    fn core(&self) -> &BufferedFileCore;

    fn core_mut(&mut self) -> &mut BufferedFileCore;

    /// # Errors
    /// The file could not be opened. The failure is also reported.
    fn open(&mut self) -> Result<(), FileError>;

    /// # Errors
    /// The file could not be closed cleanly. It is closed anyway.
    fn close(&mut self) -> Result<(), FileError>;

    fn set_file_name(&mut self, file_name: &str) {
        self.core_mut().set_file_name(file_name);
    }

    fn file_name(&self) -> &str {
        self.core().file_name()
    }

    fn set_buffer_size(&mut self, size: usize) {
        self.core_mut().set_buffer_size(size);
    }

    fn buffer_size(&self) -> usize {
        self.core().buffer_size()
    }

    fn current_buffer_size(&self) -> usize {
        self.core().current_buffer_size()
    }

    fn is_opened(&self) -> bool {
        self.core().is_opened()
    }

    fn is_error(&self) -> bool {
        self.core().is_error()
    }

    fn used_memory(&self) -> usize {
        self.core().used_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::report::CollectingReporter;
    use driver_mocked::MemDriver;

    fn core() -> BufferedFileCore {
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));
        registry
            .register(Arc::new(
                MemDriver::new("mem").with_preferred_buffer_size(2 * 1024 * 1024),
            ))
            .unwrap();
        BufferedFileCore::new(registry)
    }

    #[test]
    fn test_set_file_name_negotiates_buffer_size() {
        let mut core = core();
        core.set_file_name("mem://host/a");
        assert_eq!(core.preferred_buffer_size(), 2 * 1024 * 1024);
        core.set_file_name("zz://host/a");
        assert_eq!(core.preferred_buffer_size(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_silent_mode_suppresses_reports() {
        let reporter = Arc::new(CollectingReporter::new());
        let mut core = core();
        core.set_file_name("mem://host/a");
        core.set_reporter(reporter.clone());
        core.add_warning("first");
        core.set_silent_mode(true);
        core.add_error("second");
        core.add_simple_message("third");
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, Severity::Warning);
        assert_eq!(reports[0].source, "mem://host/a");
    }

    #[test]
    fn test_prune_keeps_content() {
        let mut core = core();
        core.allocated_buffer_size = 100;
        core.allocate_buffer().unwrap();
        core.cache.write_at(0, b"0123456789");
        core.current_buffer_size = 10;
        core.allocated_buffer_size = 4;
        core.prune_buffer();
        assert_eq!(core.allocated_buffer_size(), 10);
        assert_eq!(core.cache().to_vec(), b"0123456789");
        core.reset_buffer();
        assert!(core.cache().is_empty());
        assert_eq!(core.current_buffer_size(), 0);
    }

    #[test]
    fn test_copy_from_copies_settings_only() {
        let mut source = core();
        source.set_file_name("mem://host/a");
        source.set_field_separator(b';');
        source.set_buffer_size(4096);
        source.set_header_line_used(false);
        source.allocated_buffer_size = 64;
        source.allocate_buffer().unwrap();

        let mut copy = core();
        copy.copy_from(&source);
        assert_eq!(copy.file_name(), "mem://host/a");
        assert_eq!(copy.field_separator(), b';');
        assert_eq!(copy.buffer_size(), 4096);
        assert!(!copy.header_line_used());
        assert!(copy.cache().is_empty());
        assert!(copy.used_memory() < source.used_memory());
    }
}
