//! Scheme to driver routing.
//!
//! ```text
//!   "/tmp/x"          ─► LocalDriver (scheme "")
//!   "s3://bucket/key" ─► driver registered for "s3", connected on first use
//!   "zz://host/key"   ─► NoDriverForScheme
//! ```
//!
//! The local driver lives as long as the registry. Dynamic drivers are
//! loaded by one explicit [`DriverRegistry::scan_drivers`] call and released
//! by [`DriverRegistry::unregister_drivers`] or when the registry is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use driver_api::{DriverError, FileDriver};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{driver_scheme, RegistryConfig};
use crate::library::{BindError, LibraryDriver};
use crate::local::LocalDriver;
use crate::uri;

/// Error type for driver registration and resolution
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{uri}: malformed URI")]
    MalformedUri { uri: String },

    #[error("{uri}: no driver available for scheme '{scheme}'")]
    NoDriverForScheme { uri: String, scheme: String },

    #[error("{uri}: {scheme} is a read-only scheme and does not support '{operation}' function")]
    ReadOnlyScheme {
        uri: String,
        scheme: String,
        operation: &'static str,
    },

    #[error("unable to connect driver for scheme '{scheme}' ({source})")]
    ConnectFailed { scheme: String, source: DriverError },

    #[error("{origin}: scheme '{scheme}' is already served by {owner}")]
    DuplicateScheme {
        origin: String,
        scheme: String,
        owner: String,
    },

    #[error("{origin}: invalid scheme '{scheme}'")]
    InvalidScheme { origin: String, scheme: String },

    #[error("{origin}: driver serves scheme '{found}' but the library is named for '{expected}'")]
    SchemeMismatch {
        origin: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Summary of a registered driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
    pub scheme: String,
    pub read_only: bool,
    pub connected: bool,
    /// Library path, or the driver name for in-process drivers
    pub origin: String,
}

/// Outcome of a directory scan
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Libraries bound and registered
    pub loaded: Vec<PathBuf>,
    /// Libraries that matched the naming pattern but were rejected
    pub failures: Vec<RegistryError>,
}

struct Registered {
    driver: Arc<dyn FileDriver>,
    origin: String,
}

#[derive(Default)]
struct RegistryState {
    drivers: Vec<Registered>,
    scanned: bool,
}

/// Owner of every driver in the process.
///
/// Share it with `Arc`; resolution only takes a read lock.
pub struct DriverRegistry {
    config: RegistryConfig,
    local: Arc<LocalDriver>,
    state: RwLock<RegistryState>,
}

fn describe(driver: &dyn FileDriver, origin: &str) -> String {
    if driver.name() == origin {
        format!("'{}'", driver.name())
    } else {
        format!("'{}' ({origin})", driver.name())
    }
}

impl DriverRegistry {
    /// Registry searching the directories from the environment
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            local: Arc::new(LocalDriver::new()),
            state: RwLock::new(RegistryState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn local_driver(&self) -> Arc<dyn FileDriver> {
        self.local.clone()
    }

    /// Register an in-process driver.
    ///
    /// # Errors
    /// The scheme is invalid or already served; the earlier driver stays.
    pub fn register(&self, driver: Arc<dyn FileDriver>) -> Result<(), RegistryError> {
        let origin = driver.name().to_string();
        Self::register_locked(&mut self.state.write(), driver, origin)
    }

    fn register_locked(
        state: &mut RegistryState,
        driver: Arc<dyn FileDriver>,
        origin: String,
    ) -> Result<(), RegistryError> {
        let scheme = driver.scheme().to_string();
        if scheme.is_empty() {
            return Err(RegistryError::DuplicateScheme {
                origin,
                scheme,
                owner: format!("'{}'", crate::local::LOCAL_DRIVER_NAME),
            });
        }
        if !uri::is_valid_scheme(&scheme) {
            return Err(RegistryError::InvalidScheme { origin, scheme });
        }
        if let Some(owner) = state
            .drivers
            .iter()
            .find(|registered| registered.driver.scheme() == scheme)
        {
            return Err(RegistryError::DuplicateScheme {
                origin,
                scheme,
                owner: describe(owner.driver.as_ref(), &owner.origin),
            });
        }
        debug!(scheme = %scheme, origin = %origin, "driver registered");
        state.drivers.push(Registered { driver, origin });
        Ok(())
    }

    /// Load every driver library found in the configured directories.
    ///
    /// Only the first call scans; later calls return an empty report until
    /// [`DriverRegistry::unregister_drivers`] runs. A rejected library never
    /// stops the scan.
    pub fn scan_drivers(&self) -> ScanReport {
        self.scan_drivers_with(LibraryDriver::load)
    }

    /// [`DriverRegistry::scan_drivers`] with the library binding supplied
    /// by `open`, called once per file that matches the naming pattern.
    pub fn scan_drivers_with<F>(&self, mut open: F) -> ScanReport
    where
        F: FnMut(&Path) -> Result<LibraryDriver, BindError>,
    {
        let mut state = self.state.write();
        let mut report = ScanReport::default();
        if state.scanned {
            return report;
        }
        state.scanned = true;

        for dir in &self.config.search_dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "driver directory skipped");
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            paths.sort();
            for path in paths {
                let Some(scheme) = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(driver_scheme)
                    .map(str::to_string)
                else {
                    continue;
                };
                match Self::load_library(&mut state, open(&path), &path, &scheme) {
                    Ok(()) => {
                        info!(path = %path.display(), scheme = %scheme, "driver loaded");
                        report.loaded.push(path);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "driver rejected");
                        report.failures.push(e);
                    }
                }
            }
        }
        report
    }

    fn load_library(
        state: &mut RegistryState,
        bound: Result<LibraryDriver, BindError>,
        path: &Path,
        scheme: &str,
    ) -> Result<(), RegistryError> {
        let driver = bound?;
        let origin = path.display().to_string();
        if driver.scheme() != scheme {
            return Err(RegistryError::SchemeMismatch {
                origin,
                expected: scheme.to_string(),
                found: driver.scheme().to_string(),
            });
        }
        Self::register_locked(state, Arc::new(driver), origin)
    }

    /// Disconnect and release every dynamic driver.
    ///
    /// A driver still used by an open file is released when that file goes.
    pub fn unregister_drivers(&self) {
        let drivers = {
            let mut state = self.state.write();
            state.scanned = false;
            std::mem::take(&mut state.drivers)
        };
        for registered in drivers {
            let scheme = registered.driver.scheme().to_string();
            if registered.driver.is_connected() {
                if let Err(e) = registered.driver.disconnect() {
                    warn!(scheme = %scheme, error = %e, "disconnect failed");
                }
            }
            debug!(scheme = %scheme, "driver unregistered");
        }
    }

    #[must_use]
    pub fn is_scanned(&self) -> bool {
        self.state.read().scanned
    }

    /// Registered driver for `scheme`, without connecting it.
    #[must_use]
    pub fn lookup_scheme(&self, scheme: &str) -> Option<Arc<dyn FileDriver>> {
        if scheme.is_empty() {
            return Some(self.local_driver());
        }
        self.state
            .read()
            .drivers
            .iter()
            .find(|registered| registered.driver.scheme() == scheme)
            .map(|registered| registered.driver.clone())
    }

    /// Driver serving `uri`, connected.
    ///
    /// # Errors
    /// Malformed URI, unknown scheme, or connection failure.
    pub fn resolve(&self, uri: &str) -> Result<Arc<dyn FileDriver>, RegistryError> {
        if !uri::is_well_formed(uri) {
            return Err(RegistryError::MalformedUri {
                uri: uri.to_string(),
            });
        }
        let scheme = uri::scheme(uri);
        let driver = self
            .lookup_scheme(scheme)
            .ok_or_else(|| RegistryError::NoDriverForScheme {
                uri: uri.to_string(),
                scheme: scheme.to_string(),
            })?;
        if !driver.is_connected() {
            driver
                .connect()
                .map_err(|source| RegistryError::ConnectFailed {
                    scheme: scheme.to_string(),
                    source,
                })?;
            debug!(scheme, driver = driver.name(), "driver connected");
        }
        Ok(driver)
    }

    /// Driver serving `uri` for a write-side `operation`.
    ///
    /// # Errors
    /// Same as [`DriverRegistry::resolve`], plus read-only drivers.
    pub fn resolve_for_write(
        &self,
        uri: &str,
        operation: &'static str,
    ) -> Result<Arc<dyn FileDriver>, RegistryError> {
        let driver = self.resolve(uri)?;
        if driver.is_read_only() {
            return Err(RegistryError::ReadOnlyScheme {
                uri: uri.to_string(),
                scheme: driver.scheme().to_string(),
                operation,
            });
        }
        Ok(driver)
    }

    /// Every driver, local first
    #[must_use]
    pub fn drivers(&self) -> Vec<DriverInfo> {
        let info = |driver: &dyn FileDriver, origin: &str| DriverInfo {
            name: driver.name().to_string(),
            version: driver.version().to_string(),
            scheme: driver.scheme().to_string(),
            read_only: driver.is_read_only(),
            connected: driver.is_connected(),
            origin: origin.to_string(),
        };
        let local: &dyn FileDriver = self.local.as_ref();
        let mut all = vec![info(local, crate::local::LOCAL_DRIVER_NAME)];
        all.extend(
            self.state
                .read()
                .drivers
                .iter()
                .map(|registered| info(registered.driver.as_ref(), &registered.origin)),
        );
        all
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DriverRegistry {
    fn drop(&mut self) {
        self.unregister_drivers();
    }
}
