//! Registry configuration.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::uri::is_valid_scheme;

/// Environment variable naming the driver directory.
pub const DRIVERS_PATH_ENV: &str = "FILESTORE_DRIVERS_PATH";

/// Library file stem before the scheme, e.g. `libfilestoredriver_file_s3.so`.
pub const DRIVER_FILE_STEM: &str = "filestoredriver_file_";

/// Where driver libraries are looked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub search_dirs: Vec<PathBuf>,
}

impl RegistryConfig {
    /// Search `$FILESTORE_DRIVERS_PATH` when it names a directory, the
    /// platform defaults otherwise.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var_os(DRIVERS_PATH_ENV) {
            Some(dir) if Path::new(&dir).is_dir() => Self::with_search_dirs(vec![dir.into()]),
            Some(dir) => {
                warn!(
                    variable = DRIVERS_PATH_ENV,
                    value = %Path::new(&dir).display(),
                    "not a directory, using default driver directories"
                );
                Self::with_search_dirs(default_search_dirs())
            }
            None => Self::with_search_dirs(default_search_dirs()),
        }
    }

    #[must_use]
    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// No dynamic drivers at all
    #[must_use]
    pub fn empty() -> Self {
        Self::with_search_dirs(Vec::new())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(target_os = "windows")]
#[must_use]
pub fn default_search_dirs() -> Vec<PathBuf> {
    let program_files =
        std::env::var_os("ProgramFiles").unwrap_or_else(|| "C:\\Program Files".into());
    vec![PathBuf::from(program_files).join("filestore").join("drivers")]
}

#[cfg(target_os = "macos")]
#[must_use]
pub fn default_search_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/lib/filestore/drivers"),
        PathBuf::from("/opt/homebrew/lib/filestore/drivers"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
#[must_use]
pub fn default_search_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/lib/filestore/drivers"),
        PathBuf::from("/usr/local/lib/filestore/drivers"),
    ]
}

/// Library file name for the driver of `scheme` on this platform.
#[must_use]
pub fn driver_file_name(scheme: &str) -> String {
    format!("{DLL_PREFIX}{DRIVER_FILE_STEM}{scheme}{DLL_SUFFIX}")
}

/// Scheme encoded in a driver library file name, if the name matches.
#[must_use]
pub fn driver_scheme(file_name: &str) -> Option<&str> {
    let scheme = file_name
        .strip_prefix(DLL_PREFIX)?
        .strip_prefix(DRIVER_FILE_STEM)?
        .strip_suffix(DLL_SUFFIX)?;
    is_valid_scheme(scheme).then_some(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_file_name_round_trip() {
        let name = driver_file_name("s3");
        assert_eq!(driver_scheme(&name), Some("s3"));
    }

    #[test]
    fn test_driver_scheme_rejects_other_files() {
        assert_eq!(driver_scheme(&driver_file_name("")), None);
        assert_eq!(driver_scheme(&driver_file_name("s_3")), None);
        assert_eq!(driver_scheme("README.md"), None);
        assert_eq!(
            driver_scheme(&format!("{DLL_PREFIX}otherdriver_file_s3{DLL_SUFFIX}")),
            None
        );
    }

    #[test]
    fn test_explicit_dirs() {
        let config = RegistryConfig::with_search_dirs(vec![PathBuf::from("/opt/drivers")]);
        assert_eq!(config.search_dirs, vec![PathBuf::from("/opt/drivers")]);
        assert!(RegistryConfig::empty().search_dirs.is_empty());
    }
}
