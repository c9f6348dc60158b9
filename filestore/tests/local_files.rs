#[macro_use]
extern crate hamcrest;

use std::path::Path;
use std::sync::Arc;

use filestore::{
    BufferedFile, DriverRegistry, FileError, InputBufferedFile, OutputBufferedFile,
    RegistryConfig, SystemFile, TracingReporter,
};
use hamcrest::prelude::*;

const MB: u64 = 1024 * 1024;

fn registry() -> Arc<DriverRegistry> {
    Arc::new(DriverRegistry::with_config(RegistryConfig::empty()))
}

fn uri(path: &Path) -> String {
    path.display().to_string()
}

fn read_lines(file: &mut InputBufferedFile, buffer_size: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pos = 0;
    while pos < file.file_size() {
        file.fill(pos).unwrap();
        while !file.is_buffer_end() {
            let line = String::from_utf8(file.next_line()).unwrap();
            lines.push(line.trim_end_matches('\n').to_string());
        }
        pos += buffer_size as u64;
    }
    lines
}

// --------------------------------------------------------------------
// Buffered reading
//

#[test]
fn test_read_lines_single_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lines.txt");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

    let mut file = InputBufferedFile::new(registry());
    file.set_file_name(&uri(&path));
    file.open().unwrap();
    let buffer_size = file.buffer_size();
    let lines = read_lines(&mut file, buffer_size);
    file.close().unwrap();

    assert_that!(lines, equal_to(vec![
        "alpha".to_string(),
        "beta".to_string(),
        "gamma".to_string()
    ]));
}

#[test]
fn test_read_lines_many_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("numbers.txt");
    let expected: Vec<String> = (0..2000).map(|i| format!("line {i}\tvalue {}", i * 7)).collect();
    std::fs::write(&path, expected.join("\n") + "\n").unwrap();

    for buffer_size in [64, 1000, 4096] {
        let mut file = InputBufferedFile::new(registry());
        file.set_file_name(&uri(&path));
        file.set_buffer_size(buffer_size);
        file.open().unwrap();
        let lines = read_lines(&mut file, buffer_size);
        file.close().unwrap();
        assert_eq!(lines, expected, "buffer size {buffer_size}");
    }
}

#[test]
fn test_header_and_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.txt");
    std::fs::write(&path, "id\tname\n1\tone\n2\t\"t\"\"wo\"\n").unwrap();
    let registry = registry();

    let header = InputBufferedFile::first_line_fields(
        registry.clone(),
        &uri(&path),
        b'\t',
        Arc::new(TracingReporter),
    )
    .unwrap();
    assert_that!(header, equal_to(vec!["id".to_string(), "name".to_string()]));

    let mut file = InputBufferedFile::new(registry);
    file.set_file_name(&uri(&path));
    file.open().unwrap();
    file.fill(0).unwrap();
    file.skip_line();
    assert!(!file.skip_field());
    let field = file.next_field();
    assert_eq!(field.as_str_lossy(), "one");
    assert!(field.end_of_line);
    assert!(!file.skip_field());
    assert_eq!(file.next_field().as_str_lossy(), "t\"wo");
    assert_eq!(file.current_line_number(), 2);
}

#[test]
fn test_open_missing_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = InputBufferedFile::new(registry());
    file.core_mut().set_silent_mode(true);
    file.set_file_name(&uri(&dir.path().join("absent.txt")));
    assert!(matches!(file.open(), Err(FileError::Open { .. })));
    assert!(!file.is_opened());
}

// --------------------------------------------------------------------
// Buffered writing
//

#[test]
fn test_write_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");

    let mut output = OutputBufferedFile::new(registry());
    output.set_file_name(&uri(&path));
    output.set_buffer_size(16);
    output.open().unwrap();
    for i in 0..100 {
        output.write_field(&format!("row {i}")).unwrap();
        output.write_char(b'\t').unwrap();
        output.write_field("a\tb").unwrap();
        output.write_eol().unwrap();
    }
    output.close().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 100);
    assert_eq!(text.lines().next(), Some("row 0\t\"a\tb\""));
}

// --------------------------------------------------------------------
// Extra size reservation
//

#[test]
fn test_reservation_keeps_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reserved.bin");
    let mut file = SystemFile::new(registry());
    file.open_output(&uri(&path)).unwrap();

    file.reserve_extra_size(4 * MB).unwrap();
    assert_eq!(file.reserved_extra_size(), 4 * MB as i64);
    file.write(b"small payload").unwrap();
    assert_eq!(file.reserved_extra_size(), 4 * MB as i64 - 13);
    file.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"small payload");
}

#[test]
fn test_small_request_is_not_reserved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.bin");
    let mut file = SystemFile::new(registry());
    file.open_output(&uri(&path)).unwrap();

    file.reserve_extra_size(1000).unwrap();
    assert_eq!(file.requested_extra_size(), 1000);
    assert_eq!(file.reserved_extra_size(), 0);
    file.write(b"abc").unwrap();
    file.close().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 3);
}

#[test]
fn test_reservation_ignored_for_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.bin");
    std::fs::write(&path, "data").unwrap();
    let mut file = SystemFile::new(registry());
    file.open_input(&uri(&path)).unwrap();
    file.reserve_extra_size(8 * MB).unwrap();
    assert_eq!(file.requested_extra_size(), 0);
    assert_eq!(file.reserved_extra_size(), 0);
    file.close().unwrap();
}

// --------------------------------------------------------------------
// File services
//

#[test]
fn test_local_file_services() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let nested = dir.path().join("a").join("b");
    registry.make_directories(&uri(&nested)).unwrap();
    assert!(registry.dir_exists(&uri(&nested)));

    let file = nested.join("empty.txt");
    registry.create_empty_file(&uri(&file)).unwrap();
    assert!(registry.file_exists(&uri(&file)));
    assert_eq!(registry.file_size(&uri(&file)).unwrap(), 0);

    let copy = dir.path().join("copy.txt");
    std::fs::write(&file, "content").unwrap();
    registry.copy_file_to_local(&uri(&file), &copy).unwrap();
    assert_eq!(std::fs::read_to_string(&copy).unwrap(), "content");

    registry.remove_file(&uri(&file)).unwrap();
    assert!(!registry.file_exists(&uri(&file)));
    registry.remove_directory(&uri(&nested)).unwrap();
    assert!(!registry.dir_exists(&uri(&nested)));
}

#[test]
fn test_disk_free_space_of_local_dir() {
    let dir = tempfile::tempdir().unwrap();
    // Containers may expose no disk information at all
    match registry().disk_free_space(&uri(dir.path())) {
        Ok(_) => {}
        Err(e) => {
            assert!(matches!(e, FileError::Io { .. }), "{e}");
            assert!(e.to_string().contains("get disk free space"), "{e}");
        }
    }
}
