pub mod mem_driver;

pub use mem_driver::{MemDriver, DEFAULT_FREE_SPACE, WANT_ERROR};
