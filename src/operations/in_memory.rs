//! Reference [`BulkOperation`] backed by a vector of records.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BulkProcessError, Result};
use crate::operation::{BatchItem, BulkOperation, ItemOutcome};

/// Per-item behavior of an [`InMemoryOperation`]
pub type ItemProcessor = Arc<dyn Fn(&BatchItem) -> Result<ItemOutcome> + Send + Sync>;

pub struct InMemoryOperation {
    name: String,
    label: String,
    description: String,
    batch_size: Option<u32>,
    items: RwLock<Vec<BatchItem>>,
    processor: ItemProcessor,
    item_delay: Option<Duration>,
    fetch_failure: RwLock<Option<String>>,
    processed: Mutex<Vec<String>>,
}

impl fmt::Debug for InMemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryOperation")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .field("items", &self.items.read().len())
            .field("item_delay", &self.item_delay)
            .finish()
    }
}

impl InMemoryOperation {
    pub fn new(name: impl Into<String>, items: Vec<BatchItem>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            description: String::new(),
            batch_size: None,
            items: RwLock::new(items),
            processor: Arc::new(|_| Ok(ItemOutcome::success())),
            item_delay: None,
            fetch_failure: RwLock::new(None),
            processed: Mutex::new(Vec::new()),
        }
    }

    /// `count` records keyed `1..=count`, each succeeding
    pub fn with_items(name: impl Into<String>, count: u64) -> Self {
        let items = (1..=count)
            .map(|i| BatchItem::new(i.to_string(), format!("Item {i}")))
            .collect();
        Self::new(name, items)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(&BatchItem) -> Result<ItemOutcome> + Send + Sync + 'static,
    {
        self.processor = Arc::new(processor);
        self
    }

    /// Sleep before each item, for exercising the time budget
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = Some(delay);
        self
    }

    /// Make every subsequent fetch fail with `message`; `None` restores fetching
    pub fn set_fetch_failure(&self, message: Option<String>) {
        *self.fetch_failure.write() = message;
    }

    pub fn push_item(&self, item: BatchItem) {
        self.items.write().push(item);
    }

    /// Keys in the order they were processed, across all invocations
    pub fn processed_keys(&self) -> Vec<String> {
        self.processed.lock().clone()
    }

    pub fn process_count(&self) -> usize {
        self.processed.lock().len()
    }
}

#[async_trait]
impl BulkOperation for InMemoryOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn batch_size(&self) -> Option<u32> {
        self.batch_size
    }

    async fn total_items(&self) -> Result<u64> {
        Ok(self.items.read().len() as u64)
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<Vec<BatchItem>> {
        if let Some(message) = self.fetch_failure.read().clone() {
            return Err(BulkProcessError::operation_failed(&self.name, message));
        }

        let items = self.items.read();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(items.len());
        let end = start.saturating_add(limit as usize).min(items.len());
        Ok(items[start..end].to_vec())
    }

    async fn process(&self, item: &BatchItem) -> Result<ItemOutcome> {
        if let Some(delay) = self.item_delay {
            tokio::time::sleep(delay).await;
        }
        self.processed.lock().push(item.key.clone());
        (self.processor)(item)
    }
}
