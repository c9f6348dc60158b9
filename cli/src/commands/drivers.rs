use std::io::Write;

use filestore::{DriverInfo, DriverRegistry};
use serde::Serialize;

use super::CommandError;

#[derive(Serialize)]
struct DriverRow<'a> {
    name: &'a str,
    version: &'a str,
    scheme: &'a str,
    read_only: bool,
    connected: bool,
    origin: &'a str,
}

impl<'a> From<&'a DriverInfo> for DriverRow<'a> {
    fn from(info: &'a DriverInfo) -> Self {
        Self {
            name: &info.name,
            version: &info.version,
            scheme: &info.scheme,
            read_only: info.read_only,
            connected: info.connected,
            origin: &info.origin,
        }
    }
}

pub fn list(
    registry: &DriverRegistry,
    json: bool,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let drivers = registry.drivers();
    if json {
        let rows: Vec<DriverRow> = drivers.iter().map(DriverRow::from).collect();
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }
    for info in &drivers {
        let scheme = if info.scheme.is_empty() {
            "(local)"
        } else {
            &info.scheme
        };
        let access = if info.read_only { "ro" } else { "rw" };
        writeln!(
            out,
            "{scheme:<12} {access} {:<10} {}  [{}]",
            info.version, info.name, info.origin
        )?;
    }
    Ok(())
}

pub fn info(registry: &DriverRegistry, uri: &str, out: &mut impl Write) -> Result<(), CommandError> {
    let driver = registry.resolve(uri).map_err(filestore::FileError::from)?;
    writeln!(out, "driver:         {} {}", driver.name(), driver.version())?;
    writeln!(out, "file exists:    {}", registry.file_exists(uri))?;
    writeln!(out, "dir exists:     {}", registry.dir_exists(uri))?;
    if registry.file_exists(uri) {
        writeln!(out, "size:           {}", registry.file_size(uri)?)?;
    }
    writeln!(out, "buffer size:    {}", registry.preferred_buffer_size(uri))?;
    if !driver.is_read_only() {
        match registry.disk_free_space(uri) {
            Ok(free) => writeln!(out, "free space:     {free}")?,
            Err(e) => writeln!(out, "free space:     unknown ({e})")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestore::RegistryConfig;

    #[test]
    fn test_json_lists_local_driver() {
        let registry = DriverRegistry::with_config(RegistryConfig::empty());
        let mut out = Vec::new();
        list(&registry, true, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["scheme"], "");
        assert_eq!(rows[0]["read_only"], false);
    }

    #[test]
    fn test_info_of_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "12345").unwrap();
        let registry = DriverRegistry::with_config(RegistryConfig::empty());
        let mut out = Vec::new();
        info(&registry, &path.display().to_string(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("file exists:    true"));
        assert!(text.contains("size:           5"));
    }
}
