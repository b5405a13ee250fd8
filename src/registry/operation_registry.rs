//! Thread-safe registry of bulk operations keyed by action name.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{BulkProcessError, Result};
use crate::operation::{BulkOperation, OperationDescriptor};

#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: RwLock<HashMap<String, Arc<dyn BulkOperation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under its own name.
    ///
    /// Fails if the name is empty or already taken.
    pub fn register(&self, operation: Arc<dyn BulkOperation>) -> Result<()> {
        let name = operation.name().to_string();
        if name.trim().is_empty() {
            return Err(BulkProcessError::UnknownOperation(name));
        }

        let mut operations = self.operations.write();
        if operations.contains_key(&name) {
            return Err(BulkProcessError::DuplicateOperation(name));
        }

        info!(
            operation = %name,
            label = %operation.label(),
            batch_size = ?operation.batch_size(),
            "Registered bulk operation"
        );
        operations.insert(name, operation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BulkOperation>> {
        self.operations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BulkProcessError::UnknownOperation(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.read().contains_key(name)
    }

    /// Descriptors sorted by name
    pub fn list(&self) -> Vec<OperationDescriptor> {
        let mut descriptors: Vec<OperationDescriptor> = self
            .operations
            .read()
            .values()
            .map(|operation| operation.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.operations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }
}
