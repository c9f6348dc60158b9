//! Merge of chunk files into one output file.
//!
//! ```text
//!   header ─┐
//!   chunk 1 ─┼─► output      (chunks removed once copied, if asked)
//!   chunk 2 ─┤
//!   ...     ─┘
//! ```
//!
//! Chunks are copied raw, buffer by buffer. On failure the partial output is
//! deleted, and so are the chunks not yet removed when removal is on.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffered::{
    BufferedFile, InputBufferedFile, OutputBufferedFile, DEFAULT_FIELD_SEPARATOR,
};
use crate::cache::DEFAULT_BLOCK_SIZE;
use crate::error::FileError;
use crate::memory::{MemoryBudget, SystemMemory};
use crate::registry::DriverRegistry;
use crate::report::{Reporter, Severity, TracingReporter};

/// Error type for the chunk merge
#[derive(Debug, thiserror::Error)]
pub enum ConcatError {
    #[error(transparent)]
    Output(FileError),

    #[error("{uri}: unable to copy chunk ({source})")]
    Chunk { uri: String, source: FileError },

    #[error("{uri}: missing chunk file")]
    MissingChunk { uri: String },

    #[error("concatenation interrupted")]
    Interrupted,
}

/// Progress sink of a long task
pub trait TaskProgress: Send + Sync {
    /// `done` goes from 0 to 1.
    fn set_progress(&self, _done: f64) {}

    fn is_interruption_requested(&self) -> bool {
        false
    }
}

/// Ignores progress, never interrupts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl TaskProgress for NoProgress {}

pub struct FileConcatenater {
    registry: Arc<DriverRegistry>,
    file_name: String,
    header_line: Vec<String>,
    field_separator: u8,
    remove_chunks: bool,
    memory: Arc<dyn MemoryBudget>,
    progress: Arc<dyn TaskProgress>,
    reporter: Arc<dyn Reporter>,
}

impl FileConcatenater {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            file_name: String::new(),
            header_line: Vec::new(),
            field_separator: DEFAULT_FIELD_SEPARATOR,
            remove_chunks: true,
            memory: Arc::new(SystemMemory),
            progress: Arc::new(NoProgress),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Output URI
    pub fn set_file_name(&mut self, file_name: &str) {
        self.file_name = file_name.to_string();
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Fields written as the first line. Empty for no header.
    pub fn set_header_line(&mut self, fields: Vec<String>) {
        self.header_line = fields;
    }

    #[must_use]
    pub fn header_line(&self) -> &[String] {
        &self.header_line
    }

    pub fn set_field_separator(&mut self, separator: u8) {
        self.field_separator = separator;
    }

    /// Delete each chunk once copied. On by default.
    pub fn set_remove_chunks(&mut self, remove: bool) {
        self.remove_chunks = remove;
    }

    #[must_use]
    pub fn remove_chunks_enabled(&self) -> bool {
        self.remove_chunks
    }

    pub fn set_memory_budget(&mut self, memory: Arc<dyn MemoryBudget>) {
        self.memory = memory;
    }

    pub fn set_progress(&mut self, progress: Arc<dyn TaskProgress>) {
        self.progress = progress;
    }

    pub fn set_reporter(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporter = reporter;
    }

    /// Split a memory budget between the input and the output buffer.
    ///
    /// The output gets the preferred size. The input gets the rest, at most
    /// eight preferred sizes, in whole preferred sizes. Below two preferred
    /// sizes each gets half, but never less than one cache block.
    ///
    /// # Returns
    /// `(input, output)` buffer sizes.
    #[must_use]
    pub fn compute_buffer_sizes(available: u64, preferred: usize) -> (usize, usize) {
        let available = usize::try_from(available).unwrap_or(usize::MAX);
        let preferred = preferred.max(1);
        if available / 2 < preferred {
            let half = (available / 2).max(DEFAULT_BLOCK_SIZE);
            return (half, half);
        }
        let input = (available - preferred).min(preferred.saturating_mul(8));
        (input - input % preferred, preferred)
    }

    /// Write the header line and every chunk, in order, to the output.
    ///
    /// # Errors
    /// Missing chunk, read or write failure, or interruption. The output
    /// file does not exist afterwards.
    ///
    /// # Panics
    /// If no output file name is set.
    pub fn concatenate(&self, chunks: &[String]) -> Result<(), ConcatError> {
        assert!(!self.file_name.is_empty(), "missing output file name");
        let mut removed = 0;
        let merged = self.merge(chunks, &mut removed);
        if let Err(e) = &merged {
            self.reporter
                .report(Severity::Error, &self.file_name, &e.to_string());
            if self.registry.file_exists(&self.file_name) {
                if let Err(e) = self.registry.remove_file(&self.file_name) {
                    warn!(uri = %self.file_name, error = %e, "unable to remove partial output");
                }
            }
            if self.remove_chunks {
                self.remove_existing(&chunks[removed..]);
            }
        }
        merged
    }

    fn merge(&self, chunks: &[String], removed: &mut usize) -> Result<(), ConcatError> {
        let preferred = self.registry.preferred_buffer_size(&self.file_name);
        let (input_size, output_size) =
            Self::compute_buffer_sizes(self.memory.available_memory(), preferred);
        debug!(
            uri = %self.file_name,
            chunks = chunks.len(),
            input_size,
            output_size,
            "concatenating"
        );

        let mut output = OutputBufferedFile::new(self.registry.clone());
        output.set_file_name(&self.file_name);
        output.set_buffer_size(output_size);
        output.core_mut().set_field_separator(self.field_separator);
        // Failures surface once, from concatenate
        output.core_mut().set_silent_mode(true);
        output.open().map_err(ConcatError::Output)?;

        let copied = self.write_all(&mut output, chunks, input_size, removed);
        let closed = output.close().map_err(ConcatError::Output);
        copied.and(closed)
    }

    fn write_all(
        &self,
        output: &mut OutputBufferedFile,
        chunks: &[String],
        input_size: usize,
        removed: &mut usize,
    ) -> Result<(), ConcatError> {
        if !self.header_line.is_empty() {
            for (i, field) in self.header_line.iter().enumerate() {
                if i > 0 {
                    output
                        .write_char(self.field_separator)
                        .map_err(ConcatError::Output)?;
                }
                output.write_field(field).map_err(ConcatError::Output)?;
            }
            output.write_eol().map_err(ConcatError::Output)?;
        }

        let mut input = InputBufferedFile::new(self.registry.clone());
        input.core_mut().set_silent_mode(true);
        for (i, chunk) in chunks.iter().enumerate() {
            if self.progress.is_interruption_requested() {
                return Err(ConcatError::Interrupted);
            }
            if !self.registry.file_exists(chunk) {
                return Err(ConcatError::MissingChunk { uri: chunk.clone() });
            }
            input.set_file_name(chunk);
            input.set_buffer_size(input_size);
            self.copy_chunk(&mut input, output)?;
            if self.remove_chunks {
                if let Err(e) = self.registry.remove_file(chunk) {
                    warn!(uri = %chunk, error = %e, "unable to remove chunk");
                }
                *removed = i + 1;
            }
            self.progress.set_progress((i + 1) as f64 / chunks.len() as f64);
        }
        Ok(())
    }

    fn copy_chunk(
        &self,
        input: &mut InputBufferedFile,
        output: &mut OutputBufferedFile,
    ) -> Result<(), ConcatError> {
        let chunk_error = |input: &InputBufferedFile, source| ConcatError::Chunk {
            uri: input.file_name().to_string(),
            source,
        };
        input.open().map_err(|e| chunk_error(input, e))?;
        let mut copied = Ok(());
        let mut pos = 0;
        while pos < input.file_size() {
            if let Err(e) = input.basic_fill(pos) {
                copied = Err(chunk_error(input, e));
                break;
            }
            let filled = input.current_buffer_size();
            if let Err(e) = output.write_sub_part(input.core().cache(), 0, filled) {
                copied = Err(ConcatError::Output(e));
                break;
            }
            pos += filled as u64;
        }
        let closed = input.close().map_err(|e| chunk_error(input, e));
        copied.and(closed)
    }

    /// Delete the chunk files that exist, silently.
    pub fn remove_chunks(&self, chunks: &[String]) {
        self.remove_existing(chunks);
    }

    fn remove_existing(&self, chunks: &[String]) {
        for chunk in chunks {
            if self.registry.file_exists(chunk) {
                if let Err(e) = self.registry.remove_file(chunk) {
                    debug!(uri = %chunk, error = %e, "unable to remove chunk");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn test_compute_buffer_sizes() {
        assert_eq!(
            FileConcatenater::compute_buffer_sizes(100 * MB as u64, 8 * MB),
            (64 * MB, 8 * MB)
        );
        assert_eq!(
            FileConcatenater::compute_buffer_sizes(30 * MB as u64, 8 * MB),
            (16 * MB, 8 * MB)
        );
        assert_eq!(
            FileConcatenater::compute_buffer_sizes(10 * MB as u64, 8 * MB),
            (5 * MB, 5 * MB)
        );
        assert_eq!(
            FileConcatenater::compute_buffer_sizes(1000, 8 * MB),
            (DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE)
        );
    }
}
