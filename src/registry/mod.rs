//! # Operation Registry
//!
//! Maps action identifiers to [`BulkOperation`] implementations. The listing
//! feeds the "select action" step; lookups resolve the action named on each
//! batch request.

pub mod operation_registry;

pub use operation_registry::OperationRegistry;
