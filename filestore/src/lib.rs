//! Storage access for files of any size on any backend.
//!
//! URIs are routed by scheme to a storage driver: the local file system for
//! plain paths, drivers loaded from shared libraries for everything else.
//! On top of the drivers sit the owning [`SystemFile`] handle, buffered
//! readers and writers backed by a multi-block [`ByteCache`], and the chunk
//! merge [`FileConcatenater`].

pub mod buffered;
pub mod cache;
pub mod concat;
pub mod config;
pub mod error;
pub mod library;
pub mod local;
pub mod memory;
pub mod registry;
pub mod report;
pub mod service;
pub mod system_file;
pub mod uri;

// Re-export the driver contract
pub use driver_api::{DriverError, FileDriver, NativeHandle, OpenMode};

pub use buffered::{
    BufferedFile, BufferedFileCore, Field, FieldError, InputBufferedFile, OutputBufferedFile,
};
pub use cache::{ByteCache, CacheError, LineRead};
pub use concat::{ConcatError, FileConcatenater, NoProgress, TaskProgress};
pub use config::RegistryConfig;
pub use error::FileError;
pub use library::{BindError, LibraryDriver, SymbolSource};
pub use local::LocalDriver;
pub use memory::{FixedMemory, MemoryBudget, SystemMemory};
pub use registry::{DriverInfo, DriverRegistry, RegistryError, ScanReport};
pub use report::{CollectingReporter, Reporter, Severity, TracingReporter};
pub use system_file::{clamp_preferred_buffer_size, SystemFile};
