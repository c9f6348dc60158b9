pub mod byte_cache;
pub mod scan;

pub use byte_cache::{ByteCache, CacheError, LineRead, DEFAULT_BLOCK_SIZE};
pub use scan::{count_newlines, find_eol};
