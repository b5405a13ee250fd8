//! # Bundled Operations
//!
//! - [`InMemoryOperation`]: configurable reference implementation over a vector of
//!   records, used by tests and as a template for real operations
//! - [`demo`]: the two operations registered by `bulk-process-server`

pub mod demo;
pub mod in_memory;

pub use demo::{register_demo_operations, DemoStore, RegeneratePasswords, UpdatePostMeta};
pub use in_memory::{InMemoryOperation, ItemProcessor};
