use std::path::Path;

use filestore::DriverRegistry;
use tracing::info;

use super::CommandError;

pub fn to_local(registry: &DriverRegistry, uri: &str, path: &Path) -> Result<(), CommandError> {
    registry.copy_file_to_local(uri, path)?;
    info!(from = uri, to = %path.display(), "copied");
    Ok(())
}

pub fn from_local(registry: &DriverRegistry, path: &Path, uri: &str) -> Result<(), CommandError> {
    registry.copy_file_from_local(path, uri)?;
    info!(from = %path.display(), to = uri, "copied");
    Ok(())
}
