/// How a file is opened through a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    /// Create if missing, write after the existing content.
    Append,
}

impl OpenMode {
    /// Mode character passed through the C ABI.
    #[must_use]
    pub fn as_char(self) -> u8 {
        match self {
            Self::Read => b'r',
            Self::Write => b'w',
            Self::Append => b'a',
        }
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl std::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// Opaque token for a file opened by a driver.
///
/// Only the driver that issued a handle can interpret it. The handle is
/// neither `Clone` nor `Copy`: it has one owner and is consumed by
/// [`FileDriver::close`](crate::FileDriver::close).
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NativeHandle {
    id: u64,
}

impl NativeHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}
