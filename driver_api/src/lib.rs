//! Storage driver contract.
//!
//! A driver serves one URI scheme (the empty scheme is the local file
//! system) and exposes the operations listed in [`FileDriver`]. Drivers are
//! either linked into the host (the local driver, test doubles) or loaded
//! from shared libraries that export the C symbols declared in [`ffi`].

pub mod driver_trait;
pub mod error;
pub mod ffi;
pub mod types;

pub use driver_trait::{copy_from_local_through, copy_to_local_through, FileDriver};
pub use error::{DriverError, DriverResult};
pub use types::{NativeHandle, OpenMode};

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// Buffer size used when a driver has no opinion.
pub const DEFAULT_PREFERRED_BUFFER_SIZE: u64 = 8 * MB;
pub const MIN_PREFERRED_BUFFER_SIZE: u64 = MB;
pub const MAX_PREFERRED_BUFFER_SIZE: u64 = 64 * MB;

/// Upper bound of the intermediate buffer used by the generic copy helpers.
pub const MAX_COPY_BUFFER_SIZE: u64 = 64 * MB;

/// Major version a dynamically loaded driver must report.
pub const SUPPORTED_MAJOR_VERSION: u32 = 0;

/// Extract the major component of a `major.minor.patch` version string.
///
/// # Returns
/// `None` if the string does not start with a decimal number.
#[must_use]
pub fn major_version(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// Size of the intermediate buffer for copies through a driver.
///
/// A driver preference that is absent or not positive falls back to the
/// default; the result never exceeds [`MAX_COPY_BUFFER_SIZE`].
#[must_use]
pub fn copy_buffer_size(preferred: Option<i64>) -> usize {
    let size = match preferred {
        Some(size) if size > 0 => size.unsigned_abs(),
        _ => DEFAULT_PREFERRED_BUFFER_SIZE,
    };
    usize::try_from(size.min(MAX_COPY_BUFFER_SIZE)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_version() {
        assert_eq!(major_version("0.1.2"), Some(0));
        assert_eq!(major_version("12.0"), Some(12));
        assert_eq!(major_version(" 3 "), Some(3));
        assert_eq!(major_version("v1.0"), None);
        assert_eq!(major_version(""), None);
    }

    #[test]
    fn test_copy_buffer_size() {
        assert_eq!(copy_buffer_size(None), 8 * 1024 * 1024);
        assert_eq!(copy_buffer_size(Some(-5)), 8 * 1024 * 1024);
        assert_eq!(copy_buffer_size(Some(4096)), 4096);
        assert_eq!(copy_buffer_size(Some(1 << 40)), 64 * 1024 * 1024);
    }
}
