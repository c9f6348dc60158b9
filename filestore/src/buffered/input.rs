//! Line-aligned reader.
//!
//! A file is processed in chunks of `buffer_size` bytes. The chunk starting
//! at `pos` owns every line that begins inside `pos..pos + buffer_size`, so
//! stepping `pos` by the buffer size visits each line exactly once:
//!
//! ```text
//!   pos            pos + buffer_size - 1
//!    │                     │
//!  ..x\nline 1\nline 2\nline 3...\n
//!       └───────── buffer ─────────┘
//! ```
//!
//! The buffer starts after the first end of line at or after `pos - 1` and
//! ends at the first end of line at or after `pos + buffer_size - 1`. A line
//! that does not end within `max_line_length` bytes of that point is skipped.

use std::borrow::Cow;
use std::cell::Cell;
use std::sync::Arc;

use driver_api::{GB, MB};
use tracing::warn;

use super::{BufferedFile, BufferedFileCore, DEFAULT_BUFFER_SIZE};
use crate::cache::{find_eol, DEFAULT_BLOCK_SIZE};
use crate::error::FileError;
use crate::registry::DriverRegistry;
use crate::report::Reporter;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * MB as usize;

/// Longest field kept by [`InputBufferedFile::next_field`]; the rest is dropped.
pub const MAX_FIELD_LENGTH: usize = 1_000_000;

const READ_CHUNK_SIZE: usize = MB as usize;
const BOL_SEARCH_CHUNK_SIZE: usize = 64 * 1024;
const ENCODING_CHECK_LENGTH: usize = 1000;
const CTRL_Z: u8 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    NoError,
    TabReplaced,
    CtrlZReplaced,
    MiddleDoubleQuote,
    MissingEndDoubleQuote,
    TooLong,
}

impl FieldError {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NoError => "",
            Self::TabReplaced => "tabulation replaced by space char",
            Self::CtrlZReplaced => "Ctrl-Z (ascii 26) replaced by space char",
            Self::MiddleDoubleQuote => "double-quote in the middle of the field should be paired",
            Self::MissingEndDoubleQuote => "missing double-quote at the end of the field",
            Self::TooLong => "field too long",
        }
    }
}

/// One field of a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub value: Vec<u8>,
    /// The field is the last one of its line.
    pub end_of_line: bool,
    pub error: FieldError,
}

impl Field {
    #[must_use]
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

fn push_bounded(out: &mut Vec<u8>, c: u8, limit: usize) {
    if out.len() < limit {
        out.push(c);
    }
}

fn is_blank(c: u8) -> bool {
    c.is_ascii_whitespace() || c == b'\x0b' || c == CTRL_Z
}

/// Short form of a value for messages
fn display_value(value: &str) -> Cow<'_, str> {
    const MAX_CHARS: usize = 20;
    if value.chars().count() <= MAX_CHARS + 3 {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("{}...", value.chars().take(MAX_CHARS).collect::<String>()))
    }
}

/// Buffered reader of a text file.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use filestore::{BufferedFile, DriverRegistry, InputBufferedFile};
/// # fn main() -> Result<(), filestore::FileError> {
/// let registry = Arc::new(DriverRegistry::new());
/// let mut file = InputBufferedFile::new(registry);
/// file.set_file_name("/tmp/data.txt");
/// file.open()?;
/// let mut pos = 0;
/// while pos < file.file_size() {
///     file.fill(pos)?;
///     while !file.is_buffer_end() {
///         let field = file.next_field();
///         println!("{}", field.as_str_lossy());
///     }
///     pos += file.buffer_size() as u64;
/// }
/// file.close()?;
/// # Ok(())
/// # }
/// ```
pub struct InputBufferedFile {
    core: BufferedFileCore,
    max_line_length: usize,
    file_size: u64,
    buffer_start: u64,
    position_in_buffer: usize,
    read_line_number: usize,
    buffer_line_number: Cell<Option<usize>>,
    last_field_reach_eol: bool,
    eof: bool,
    skipped_line: bool,
}

impl InputBufferedFile {
    #[must_use]
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            core: BufferedFileCore::new(registry),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            file_size: 0,
            buffer_start: 0,
            position_in_buffer: 0,
            read_line_number: 0,
            buffer_line_number: Cell::new(None),
            last_field_reach_eol: false,
            eof: false,
            skipped_line: false,
        }
    }

    /// Copy the settings of `other`, not its file or buffer.
    pub fn copy_from(&mut self, other: &InputBufferedFile) {
        self.core.copy_from(&other.core);
        self.max_line_length = other.max_line_length;
        self.reset();
    }

    fn reset(&mut self) {
        self.file_size = 0;
        self.buffer_start = 0;
        self.reset_position();
        self.eof = false;
        self.skipped_line = false;
        self.core.current_buffer_size = 0;
    }

    fn reset_position(&mut self) {
        self.position_in_buffer = 0;
        self.read_line_number = 0;
        self.buffer_line_number.set(None);
        self.last_field_reach_eol = false;
    }

    /// # Panics
    /// If `length` is zero.
    pub fn set_max_line_length(&mut self, length: usize) {
        assert!(length > 0, "max line length must be positive");
        self.max_line_length = length;
    }

    #[must_use]
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    #[must_use]
    pub fn max_buffer_size(&self) -> usize {
        (2 * GB as usize - 1).saturating_sub(self.max_line_length)
    }

    /// Buffer size for an expected amount of data, within the supported range.
    #[must_use]
    pub fn fit_buffer_size(&self, expected: u64) -> usize {
        usize::try_from(expected)
            .unwrap_or(usize::MAX)
            .clamp(DEFAULT_BLOCK_SIZE, self.max_buffer_size())
    }

    /// Size of the open file
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Fill the buffer with the lines owned by the chunk starting at `pos`.
    ///
    /// # Errors
    /// Read failure or allocation failure. Both are also reported.
    ///
    /// # Panics
    /// If the file is not open or the buffer size is zero.
    pub fn fill(&mut self, pos: u64) -> Result<(), FileError> {
        assert!(self.core.is_opened, "{}: file is not open", self.core.file_name());
        let buffer_size = self.core.buffer_size();
        assert!(buffer_size > 0, "buffer size must be positive");
        let filled = self.fill_lines(pos, buffer_size);
        if let Err(e) = &filled {
            self.core.is_error = true;
            self.core.current_buffer_size = 0;
            // Allocation failures are already reported
            if !matches!(e, FileError::Cache(_)) {
                self.core.add_error(&e.to_string());
            }
        }
        self.core.allocated_buffer_size = self.core.current_buffer_size;
        self.core.prune_buffer();
        filled
    }

    fn fill_lines(&mut self, pos: u64, buffer_size: usize) -> Result<(), FileError> {
        self.reset_position();
        self.skipped_line = false;
        self.eof = false;
        self.core.current_buffer_size = 0;
        self.buffer_start = pos;

        if pos >= self.file_size {
            self.eof = true;
            return Ok(());
        }
        let chunk_end = pos + buffer_size as u64;
        let Some(line_start) = self.find_bol(pos, buffer_size)? else {
            self.eof = chunk_end >= self.file_size;
            return Ok(());
        };
        self.buffer_start = line_start;
        self.core.handle_mut()?.seek(line_start)?;

        // Offset from the line start where the end of line search begins
        let extra_part = usize::try_from(chunk_end - 1 - line_start).unwrap_or(usize::MAX);
        let remaining = usize::try_from(self.file_size - line_start).unwrap_or(usize::MAX);
        let limit = extra_part.saturating_add(self.max_line_length).min(remaining);

        self.core.allocated_buffer_size = buffer_size.min(limit);
        self.core.allocate_buffer()?;

        let mut chunk = vec![0u8; READ_CHUNK_SIZE.min(limit.max(1))];
        let mut filled = 0;
        let mut eol_at = None;
        while filled < limit {
            let wanted = chunk.len().min(limit - filled);
            let read = self.core.handle_mut()?.read(&mut chunk[..wanted])?;
            if filled + read > self.core.allocated_buffer_size {
                self.core.allocated_buffer_size = (filled + read).max(2 * filled).min(limit);
                self.core.allocate_buffer()?;
            }
            self.core.cache.write_at(filled, &chunk[..read]);

            let search_from = extra_part.max(filled);
            if search_from < filled + read {
                eol_at = find_eol(&chunk[search_from - filled..read]).map(|at| search_from + at);
            }
            filled += read;
            if eol_at.is_some() || read < wanted {
                break;
            }
        }

        self.core.current_buffer_size = match eol_at {
            Some(at) => at + 1,
            None if line_start + filled as u64 >= self.file_size => filled,
            None => {
                // The line crossing the chunk end is too long: keep the lines before it
                self.skipped_line = true;
                let mut kept = 0;
                let mut offset = 0;
                for segment in self.core.cache.slices(0, extra_part.min(filled)) {
                    if let Some(at) = segment.iter().rposition(|&c| c == b'\n') {
                        kept = offset + at + 1;
                    }
                    offset += segment.len();
                }
                kept
            }
        };
        self.eof = line_start + self.core.current_buffer_size as u64 >= self.file_size;
        Ok(())
    }

    /// Start of the first line beginning in `pos..pos + buffer_size`.
    fn find_bol(&mut self, pos: u64, buffer_size: usize) -> Result<Option<u64>, FileError> {
        if pos == 0 {
            return Ok(Some(0));
        }
        let file_size = self.file_size;
        let handle = self.core.handle_mut()?;
        handle.seek(pos - 1)?;
        let mut chunk = vec![0u8; BOL_SEARCH_CHUNK_SIZE.min(buffer_size)];
        let mut scanned = 0;
        while scanned < buffer_size {
            let wanted = chunk.len().min(buffer_size - scanned);
            let read = handle.read(&mut chunk[..wanted])?;
            if let Some(at) = find_eol(&chunk[..read]) {
                let line_start = pos + (scanned + at) as u64;
                return Ok((line_start < file_size).then_some(line_start));
            }
            scanned += read;
            if read < wanted {
                break;
            }
        }
        Ok(None)
    }

    /// Fill the buffer with the raw bytes at `pos`, without line alignment.
    ///
    /// # Errors
    /// Read failure, allocation failure, or no byte readable before the end
    /// of the file.
    ///
    /// # Panics
    /// If the file is not open.
    pub fn basic_fill(&mut self, pos: u64) -> Result<(), FileError> {
        assert!(self.core.is_opened, "{}: file is not open", self.core.file_name());
        self.reset_position();
        self.skipped_line = false;
        self.buffer_start = pos;
        self.core.current_buffer_size = 0;
        if pos >= self.file_size {
            self.eof = true;
            return Ok(());
        }
        let size = usize::try_from(self.file_size - pos)
            .unwrap_or(usize::MAX)
            .min(self.core.buffer_size());
        self.core.allocated_buffer_size = size;
        self.core.allocate_buffer()?;
        let read = match self.core.handle.as_mut() {
            Some(handle) => self.core.cache.read_from_file(handle, pos, size),
            None => Err(FileError::NotOpen {
                uri: self.core.file_name.clone(),
            }),
        };
        let read = match read {
            Ok(0) if size > 0 => Err(FileError::Format {
                uri: self.core.file_name().to_string(),
                message: format!("unexpected end of file at offset {pos}"),
            }),
            other => other,
        };
        match read {
            Ok(read) => {
                self.core.current_buffer_size = read;
                self.eof = pos + read as u64 >= self.file_size;
                Ok(())
            }
            Err(e) => {
                self.core.is_error = true;
                self.core.add_error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Fill the buffer with the first line of the file, end of line included.
    ///
    /// # Errors
    /// Read failure, or a first line longer than `max_line_length`.
    pub fn fill_with_header_line(&mut self) -> Result<(), FileError> {
        assert!(self.core.is_opened, "{}: file is not open", self.core.file_name());
        self.reset_position();
        self.skipped_line = false;
        self.eof = false;
        self.buffer_start = 0;
        self.core.reset_buffer();

        let max_line_length = self.max_line_length;
        let handle = self.core.handle_mut()?;
        handle.seek(0)?;
        let mut chunk = vec![0u8; BOL_SEARCH_CHUNK_SIZE];
        let mut line = Vec::new();
        loop {
            let read = handle.read(&mut chunk)?;
            let data = &chunk[..read];
            let (taken, found) = match find_eol(data) {
                Some(at) => (&data[..=at], true),
                None => (data, false),
            };
            line.extend_from_slice(taken);
            if line.len() > max_line_length {
                let e = FileError::Format {
                    uri: self.core.file_name().to_string(),
                    message: format!("first line too long (more than {max_line_length} bytes)"),
                };
                self.core.is_error = true;
                self.core.add_error(&e.to_string());
                return Err(e);
            }
            if found || read < chunk.len() {
                break;
            }
        }
        self.core.allocated_buffer_size = line.len();
        self.core.allocate_buffer()?;
        self.core.cache.write_at(0, &line);
        self.core.current_buffer_size = line.len();
        self.eof = line.len() as u64 >= self.file_size;
        Ok(())
    }

    /// The last fill reached the end of the file.
    #[must_use]
    pub fn is_last_buffer(&self) -> bool {
        self.eof
    }

    /// File position of the first buffered byte
    #[must_use]
    pub fn buffer_start_file_pos(&self) -> u64 {
        self.buffer_start
    }

    /// The last fill skipped a line longer than `max_line_length`.
    #[must_use]
    pub fn buffer_skipped_line(&self) -> bool {
        self.skipped_line
    }

    #[must_use]
    pub fn is_buffer_end(&self) -> bool {
        self.position_in_buffer >= self.core.current_buffer_size
    }

    #[must_use]
    pub fn is_file_end(&self) -> bool {
        self.position_in_file() >= self.file_size
    }

    /// Lines fully read from the buffer so far
    #[must_use]
    pub fn current_line_number(&self) -> usize {
        self.read_line_number
    }

    /// Lines in the buffer. A last line without end of line counts.
    #[must_use]
    pub fn buffer_line_number(&self) -> usize {
        if let Some(count) = self.buffer_line_number.get() {
            return count;
        }
        let size = self.core.current_buffer_size;
        let mut count = self.core.cache.compute_line_number(0, size);
        if size > 0 && self.core.cache.get(size - 1) != Some(b'\n') && !self.skipped_line {
            count += 1;
        }
        self.buffer_line_number.set(Some(count));
        count
    }

    #[must_use]
    pub fn position_in_buffer(&self) -> usize {
        self.position_in_buffer
    }

    #[must_use]
    pub fn position_in_file(&self) -> u64 {
        self.buffer_start + self.position_in_buffer as u64
    }

    fn next_char(&mut self) -> u8 {
        let c = self.core.cache.get(self.position_in_buffer).unwrap_or(b'\n');
        self.position_in_buffer += 1;
        c
    }

    /// Read the next field of the current line.
    ///
    /// Surrounding blanks are trimmed, inner tabs and Ctrl-Z become spaces.
    /// A field starting with a double quote extends to the matching closing
    /// quote, with doubled quotes standing for one quote. Malformed quoted
    /// fields are returned verbatim up to the next separator.
    pub fn next_field(&mut self) -> Field {
        let mut value = Vec::new();
        let (end_of_line, mut error) = self.scan_field(&mut value, MAX_FIELD_LENGTH);
        if value.len() >= MAX_FIELD_LENGTH {
            error = FieldError::TooLong;
        }
        let end = value.iter().rposition(|&c| !is_blank(c)).map_or(0, |at| at + 1);
        value.truncate(end);
        let start = value.iter().position(|&c| !is_blank(c)).unwrap_or(value.len());
        value.drain(..start);
        for c in &mut value {
            let replaced = match *c {
                b'\t' => FieldError::TabReplaced,
                CTRL_Z => FieldError::CtrlZReplaced,
                _ => continue,
            };
            *c = b' ';
            if error == FieldError::NoError {
                error = replaced;
            }
        }
        Field {
            value,
            end_of_line,
            error,
        }
    }

    /// Skip the next field.
    ///
    /// # Returns
    /// `true` if it was the last field of its line.
    pub fn skip_field(&mut self) -> bool {
        self.scan_field(&mut Vec::new(), 0).0
    }

    /// Raw field scan keeping at most `limit` bytes in `out`.
    fn scan_field(&mut self, out: &mut Vec<u8>, limit: usize) -> (bool, FieldError) {
        self.count_pending_line();
        if self.is_buffer_end() {
            return (true, FieldError::NoError);
        }
        let separator = self.core.field_separator();
        let c = self.next_char();
        if c == b'"' && separator != b'"' {
            return self.scan_quoted_field(out, limit);
        }
        (self.scan_plain_field(c, out, limit), FieldError::NoError)
    }

    /// Scan up to the next separator or end of line, `c` being already read.
    fn scan_plain_field(&mut self, mut c: u8, out: &mut Vec<u8>, limit: usize) -> bool {
        let separator = self.core.field_separator();
        loop {
            if c == b'\n' {
                self.last_field_reach_eol = true;
                return true;
            }
            if c == separator {
                return false;
            }
            push_bounded(out, c, limit);
            if self.is_buffer_end() {
                return true;
            }
            c = self.next_char();
        }
    }

    fn scan_quoted_field(&mut self, out: &mut Vec<u8>, limit: usize) -> (bool, FieldError) {
        let separator = self.core.field_separator();
        let mut raw = vec![b'"'];
        let raw_limit = limit.saturating_add(1);
        let mut end_of_line = true;
        let mut error = FieldError::MissingEndDoubleQuote;
        if !self.is_buffer_end() {
            let mut c = self.next_char();
            loop {
                if c == b'"' {
                    if self.is_buffer_end() {
                        error = FieldError::NoError;
                        break;
                    }
                    c = self.next_char();
                    if c == separator {
                        error = FieldError::NoError;
                        end_of_line = false;
                        break;
                    }
                    if c == b'\n' {
                        error = FieldError::NoError;
                        self.last_field_reach_eol = true;
                        break;
                    }
                    if c == b'"' {
                        push_bounded(&mut raw, b'"', raw_limit);
                        push_bounded(&mut raw, b'"', raw_limit);
                        if self.is_buffer_end() {
                            break;
                        }
                        c = self.next_char();
                        continue;
                    }
                    // Isolated quote: keep everything up to the next separator
                    error = FieldError::MiddleDoubleQuote;
                    if c == b'\r' {
                        if self.is_buffer_end() {
                            error = FieldError::NoError;
                            break;
                        }
                        let next = self.next_char();
                        if next == separator || next == b'\n' {
                            error = FieldError::NoError;
                            end_of_line = next == b'\n';
                            self.last_field_reach_eol = end_of_line;
                            break;
                        }
                        push_bounded(&mut raw, b'"', raw_limit);
                        push_bounded(&mut raw, b'\r', raw_limit);
                        c = next;
                    } else {
                        push_bounded(&mut raw, b'"', raw_limit);
                    }
                    end_of_line = self.scan_plain_field(c, &mut raw, raw_limit);
                    break;
                }
                if c == b'\n' {
                    self.last_field_reach_eol = true;
                    break;
                }
                push_bounded(&mut raw, c, raw_limit);
                if self.is_buffer_end() {
                    break;
                }
                c = self.next_char();
            }
        }

        if error == FieldError::NoError {
            let mut i = 1;
            while i < raw.len() {
                push_bounded(out, raw[i], limit);
                i += if raw[i] == b'"' { 2 } else { 1 };
            }
        } else {
            for &c in &raw {
                push_bounded(out, c, limit);
            }
        }
        (end_of_line, error)
    }

    /// Rest of the current line, end of line included.
    pub fn next_line(&mut self) -> Vec<u8> {
        self.count_pending_line();
        let start = self.position_in_buffer;
        let end = match self.core.cache.find_eol(start) {
            Some(at) if at < self.core.current_buffer_size => {
                self.read_line_number += 1;
                at + 1
            }
            _ => self.core.current_buffer_size,
        };
        self.position_in_buffer = end;
        let mut line = vec![0u8; end - start];
        self.core.cache.read_at(start, &mut line);
        line
    }

    pub fn skip_line(&mut self) {
        self.count_pending_line();
        match self.core.cache.find_eol(self.position_in_buffer) {
            Some(at) if at < self.core.current_buffer_size => {
                self.read_line_number += 1;
                self.position_in_buffer = at + 1;
            }
            _ => self.position_in_buffer = self.core.current_buffer_size,
        }
    }

    /// Count the line ended by the last field read, if any.
    fn count_pending_line(&mut self) {
        if self.last_field_reach_eol {
            self.read_line_number += 1;
            self.last_field_reach_eol = false;
        }
    }

    /// Check that the buffer start does not look like an unsupported encoding.
    ///
    /// # Errors
    /// A byte order mark, or a NUL byte in the first bytes of the buffer.
    pub fn check_encoding(&self) -> Result<(), FileError> {
        const ADVICE: &str = "; try convert the file to ANSI or UTF-8 (without BOM) format";
        let mut head = vec![0u8; self.core.current_buffer_size.min(ENCODING_CHECK_LENGTH + 2)];
        self.core.cache.read_at(0, &mut head);
        let encoding = if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
            Some("UTF-8 with BOM")
        } else if head.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
            Some("UTF-32 big endian")
        } else if head.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
            Some("UTF-32 little endian")
        } else if head.starts_with(&[0xFE, 0xFF]) {
            Some("UTF-16 big endian")
        } else if head.starts_with(&[0xFF, 0xFE]) {
            Some("UTF-16 little endian")
        } else {
            None
        };
        let message = match encoding {
            Some(encoding) => Some(format!("Encoding type cannot be handled ({encoding}){ADVICE}")),
            None => head.iter().position(|&c| c == 0).map(|at| {
                format!(
                    "Encoding type cannot be handled (null char detected at offset {}){ADVICE}",
                    at + 1
                )
            }),
        };
        match message {
            Some(message) => Err(FileError::Format {
                uri: self.core.file_name().to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Position of the first end of line at or after `pos`.
    ///
    /// # Returns
    /// `None` if the file ends first.
    ///
    /// # Errors
    /// Seek or read failure.
    pub fn find_eol_position(&mut self, pos: u64) -> Result<Option<u64>, FileError> {
        let handle = self.core.handle_mut()?;
        handle.seek(pos)?;
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut offset = pos;
        loop {
            let read = handle.read(&mut chunk)?;
            if let Some(at) = find_eol(&chunk[..read]) {
                return Ok(Some(offset + at as u64));
            }
            offset += read as u64;
            if read < chunk.len() {
                return Ok(None);
            }
        }
    }

    /// Fields of the first line of `uri`.
    ///
    /// Field anomalies are reported as warnings, failures as errors.
    ///
    /// # Errors
    /// Open or read failure, a too long first line, or an unsupported encoding.
    pub fn first_line_fields(
        registry: Arc<DriverRegistry>,
        uri: &str,
        separator: u8,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Vec<String>, FileError> {
        let mut file = InputBufferedFile::new(registry);
        file.set_file_name(uri);
        file.core.set_field_separator(separator);
        file.core.set_reporter(reporter);
        file.open()?;
        let size = usize::try_from(file.file_size()).unwrap_or(usize::MAX);
        file.set_buffer_size(size.min(DEFAULT_BUFFER_SIZE));

        let parsed = file
            .fill_with_header_line()
            .and_then(|()| file.check_encoding());
        if let Err(e) = &parsed {
            file.core.add_error(&e.to_string());
        }
        let mut fields = Vec::new();
        if parsed.is_ok() {
            loop {
                let field = file.next_field();
                let value = field.as_str_lossy().into_owned();
                if field.error != FieldError::NoError {
                    file.core.add_warning(&format!(
                        "First line field {} <{}> : {}",
                        fields.len() + 1,
                        display_value(&value),
                        field.error.label()
                    ));
                }
                fields.push(value);
                if field.end_of_line {
                    break;
                }
            }
        }
        let closed = file.close();
        parsed?;
        closed?;
        Ok(fields)
    }
}

impl BufferedFile for InputBufferedFile {
    fn core(&self) -> &BufferedFileCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BufferedFileCore {
        &mut self.core
    }

    fn open(&mut self) -> Result<(), FileError> {
        self.reset();
        self.core
            .open_handle(|handle, file_name| handle.open_input(file_name))?;
        let size = self.core.handle_mut().and_then(|handle| handle.file_size());
        match size {
            Ok(size) => {
                self.file_size = size;
                Ok(())
            }
            Err(e) => {
                self.core.add_error(&e.to_string());
                if let Err(closed) = self.core.close_handle() {
                    warn!(
                        uri = %self.core.file_name(),
                        error = %closed,
                        "close after size failure"
                    );
                }
                self.core.is_error = true;
                Err(e)
            }
        }
    }

    fn close(&mut self) -> Result<(), FileError> {
        let closed = self.core.close_handle();
        self.core.is_error = false;
        self.core.reset_buffer();
        self.reset();
        closed
    }
}

impl Drop for InputBufferedFile {
    fn drop(&mut self) {
        if self.core.is_opened {
            if let Err(e) = self.close() {
                warn!(uri = %self.core.file_name(), error = %e, "close on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::report::{CollectingReporter, Severity};
    use driver_mocked::MemDriver;

    fn reader(content: &[u8]) -> InputBufferedFile {
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));
        let driver = Arc::new(MemDriver::new("mem"));
        driver.add_file("mem://host/f", content);
        registry.register(driver).unwrap();
        let mut file = InputBufferedFile::new(registry);
        file.set_file_name("mem://host/f");
        file.open().unwrap();
        file
    }

    fn fields_of_line(file: &mut InputBufferedFile) -> Vec<(String, FieldError)> {
        let mut fields = Vec::new();
        loop {
            let field = file.next_field();
            fields.push((field.as_str_lossy().into_owned(), field.error));
            if field.end_of_line {
                return fields;
            }
        }
    }

    #[test]
    fn test_fill_whole_small_file() {
        let mut file = reader(b"a\tb\nc\td\n");
        file.fill(0).unwrap();
        assert_eq!(file.current_buffer_size(), 8);
        assert!(file.is_last_buffer());
        assert_eq!(file.buffer_line_number(), 2);
        let first = fields_of_line(&mut file);
        assert_eq!(
            first,
            vec![
                ("a".to_string(), FieldError::NoError),
                ("b".to_string(), FieldError::NoError)
            ]
        );
        let second = fields_of_line(&mut file);
        assert_eq!(second[1].0, "d");
        assert!(file.is_buffer_end());
        assert!(file.is_file_end());
        assert_eq!(file.current_line_number(), 1);
    }

    #[test]
    fn test_chunks_visit_each_line_once() {
        let content = b"first line\nsecond\nthird line is longer\n4\nfifth\n";
        for buffer_size in 1..=content.len() + 1 {
            let mut file = reader(content);
            file.set_buffer_size(buffer_size);
            let mut collected = Vec::new();
            let mut lines = 0;
            let mut pos = 0;
            while pos < file.file_size() {
                file.fill(pos).unwrap();
                lines += file.buffer_line_number();
                collected.extend(file.core().cache().to_vec());
                pos += buffer_size as u64;
            }
            assert_eq!(collected, content.to_vec(), "buffer size {buffer_size}");
            assert_eq!(lines, 5, "buffer size {buffer_size}");
        }
    }

    #[test]
    fn test_last_line_without_eol_counts() {
        let mut file = reader(b"a\nb");
        file.fill(0).unwrap();
        assert_eq!(file.buffer_line_number(), 2);
        assert!(file.is_last_buffer());
    }

    #[test]
    fn test_too_long_line_is_skipped() {
        let mut file = reader(b"ok\nthis line is too long\nnext\n");
        file.set_buffer_size(4);
        file.set_max_line_length(5);
        file.fill(0).unwrap();
        assert!(file.buffer_skipped_line());
        assert_eq!(file.core().cache().to_vec(), b"ok\n");
        assert!(!file.is_last_buffer());
    }

    #[test]
    fn test_fill_past_end() {
        let mut file = reader(b"abc\n");
        file.fill(10).unwrap();
        assert_eq!(file.current_buffer_size(), 0);
        assert!(file.is_last_buffer());
    }

    #[test]
    fn test_basic_fill_ignores_lines() {
        let mut file = reader(b"abc\ndef\n");
        file.set_buffer_size(3);
        file.basic_fill(2).unwrap();
        assert_eq!(file.core().cache().to_vec(), b"c\nd");
        assert_eq!(file.buffer_start_file_pos(), 2);
        assert!(!file.is_last_buffer());
        file.basic_fill(6).unwrap();
        assert_eq!(file.core().cache().to_vec(), b"f\n");
        assert!(file.is_last_buffer());
    }

    #[test]
    fn test_quoted_fields() {
        let mut file = reader(b"\"a\tb\"\t\"say \"\"hi\"\"\"\t\"x\"y\t\"open\n");
        file.fill(0).unwrap();
        let fields = fields_of_line(&mut file);
        assert_eq!(fields[0], ("a b".to_string(), FieldError::TabReplaced));
        assert_eq!(fields[1], ("say \"hi\"".to_string(), FieldError::NoError));
        assert_eq!(fields[2], ("\"x\"y".to_string(), FieldError::MiddleDoubleQuote));
        assert_eq!(
            fields[3],
            ("\"open".to_string(), FieldError::MissingEndDoubleQuote)
        );
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn test_fields_are_trimmed() {
        let mut file = reader(b"  a b \t\x1a\t c\r\n");
        file.fill(0).unwrap();
        let fields = fields_of_line(&mut file);
        assert_eq!(fields[0].0, "a b");
        assert_eq!(fields[1].0, "");
        assert_eq!(fields[2].0, "c");
        assert_eq!(fields[0].1, FieldError::NoError);
    }

    #[test]
    fn test_skip_field_and_lines() {
        let mut file = reader(b"a\t\"b\tc\"\td\nline two\nthree\n");
        file.fill(0).unwrap();
        assert!(!file.skip_field());
        assert!(!file.skip_field());
        assert!(file.skip_field());
        assert_eq!(file.next_line(), b"line two\n");
        file.skip_line();
        assert!(file.is_buffer_end());
        assert_eq!(file.current_line_number(), 3);
    }

    #[test]
    fn test_header_line() {
        let mut file = reader(b"name\tage\nbob\t12\n");
        file.fill_with_header_line().unwrap();
        assert_eq!(file.core().cache().to_vec(), b"name\tage\n");
        assert!(!file.is_last_buffer());
    }

    #[test]
    fn test_check_encoding() {
        let mut file = reader(b"\xEF\xBB\xBFid\n");
        file.fill(0).unwrap();
        let err = file.check_encoding().unwrap_err();
        assert!(err.to_string().contains("(UTF-8 with BOM)"));

        let mut file = reader(b"\xFF\xFEi\0d\0");
        file.fill(0).unwrap();
        assert!(file
            .check_encoding()
            .unwrap_err()
            .to_string()
            .contains("UTF-16 little endian"));

        let mut file = reader(b"ab\0c\n");
        file.fill(0).unwrap();
        assert!(file
            .check_encoding()
            .unwrap_err()
            .to_string()
            .contains("null char detected at offset 3"));

        let mut file = reader(b"plain\n");
        file.fill(0).unwrap();
        assert!(file.check_encoding().is_ok());
    }

    #[test]
    fn test_find_eol_position() {
        let mut file = reader(b"abc\ndef");
        assert_eq!(file.find_eol_position(0).unwrap(), Some(3));
        assert_eq!(file.find_eol_position(4).unwrap(), None);
    }

    #[test]
    fn test_first_line_fields() {
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));
        let driver = Arc::new(MemDriver::new("mem"));
        driver.add_file("mem://host/f", b"id;\"full name\";a\tb\nx;y;z\n");
        registry.register(driver).unwrap();
        let reporter = Arc::new(CollectingReporter::new());
        let fields =
            InputBufferedFile::first_line_fields(registry, "mem://host/f", b';', reporter.clone())
                .unwrap();
        assert_eq!(fields, vec!["id", "full name", "a b"]);
        assert_eq!(
            reporter.texts(Severity::Warning),
            vec!["First line field 3 <a b> : tabulation replaced by space char".to_string()]
        );
    }

    #[test]
    fn test_open_missing_file_reports_error() {
        let registry = Arc::new(DriverRegistry::with_config(RegistryConfig::empty()));
        registry.register(Arc::new(MemDriver::new("mem"))).unwrap();
        let reporter = Arc::new(CollectingReporter::new());
        let mut file = InputBufferedFile::new(registry);
        file.set_file_name("mem://host/missing");
        file.core_mut().set_reporter(reporter.clone());
        assert!(file.open().is_err());
        assert!(file.is_error());
        assert!(!file.is_opened());
        assert_eq!(reporter.texts(Severity::Error).len(), 1);
    }

    #[test]
    fn test_fit_buffer_size() {
        let file = InputBufferedFile::new(Arc::new(DriverRegistry::with_config(
            RegistryConfig::empty(),
        )));
        assert_eq!(file.fit_buffer_size(10), DEFAULT_BLOCK_SIZE);
        assert_eq!(file.fit_buffer_size(1 << 20), 1 << 20);
        assert_eq!(file.fit_buffer_size(u64::MAX), file.max_buffer_size());
    }
}
