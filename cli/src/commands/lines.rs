use std::io::Write;
use std::sync::Arc;

use filestore::{BufferedFile, DriverRegistry, FileError, InputBufferedFile, TracingReporter};
use tracing::debug;

use super::CommandError;

/// Number of lines of `uri`, a last line without end of line included.
///
/// # Errors
/// Open or read failure.
pub fn count_lines(
    registry: &Arc<DriverRegistry>,
    uri: &str,
    buffer_size: Option<usize>,
) -> Result<u64, FileError> {
    let mut file = InputBufferedFile::new(registry.clone());
    file.set_file_name(uri);
    let buffer_size = match buffer_size {
        Some(size) => size.max(1),
        None => file
            .fit_buffer_size(registry.file_size(uri)?)
            .min(file.core().preferred_buffer_size()),
    };
    file.set_buffer_size(buffer_size);
    file.open()?;

    let mut count = 0u64;
    let mut pos = 0;
    let counted = loop {
        if pos >= file.file_size() {
            break Ok(());
        }
        if let Err(e) = file.fill(pos) {
            break Err(e);
        }
        if file.buffer_skipped_line() {
            debug!(uri, pos, "too long line skipped");
        }
        count += file.buffer_line_number() as u64;
        pos += buffer_size as u64;
    };
    let closed = file.close();
    counted?;
    closed?;
    Ok(count)
}

pub fn print_count(count: u64, out: &mut impl Write) -> Result<(), CommandError> {
    writeln!(out, "{count}")?;
    Ok(())
}

pub fn header(
    registry: &Arc<DriverRegistry>,
    uri: &str,
    separator: char,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let separator = u8::try_from(separator).unwrap_or(b'\t');
    let fields = InputBufferedFile::first_line_fields(
        registry.clone(),
        uri,
        separator,
        Arc::new(TracingReporter),
    )?;
    for (i, field) in fields.iter().enumerate() {
        writeln!(out, "{}\t{field}", i + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestore::RegistryConfig;

    fn registry() -> Arc<DriverRegistry> {
        Arc::new(DriverRegistry::with_config(RegistryConfig::empty()))
    }

    #[test]
    fn test_count_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let content: String = (0..500).map(|i| format!("{i}\n")).collect();
        std::fs::write(&path, content + "tail").unwrap();
        let uri = path.display().to_string();
        for size in [None, Some(7), Some(100)] {
            assert_eq!(count_lines(&registry(), &uri, size).unwrap(), 501, "{size:?}");
        }
    }

    #[test]
    fn test_count_lines_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();
        assert_eq!(
            count_lines(&registry(), &path.display().to_string(), None).unwrap(),
            0
        );
    }

    #[test]
    fn test_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "a;b;c\n1;2;3\n").unwrap();
        let mut out = Vec::new();
        header(&registry(), &path.display().to_string(), ';', &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\ta\n2\tb\n3\tc\n");
    }
}
