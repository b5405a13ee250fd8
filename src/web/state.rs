//! # Web Application State

use std::sync::Arc;

use crate::config::WebConfig;
use crate::context::BulkProcessContext;

/// Shared state handed to every handler; cheap to clone
#[derive(Clone, Debug)]
pub struct AppState {
    pub context: Arc<BulkProcessContext>,
}

impl AppState {
    pub fn new(context: Arc<BulkProcessContext>) -> Self {
        Self { context }
    }

    pub fn web_config(&self) -> &WebConfig {
        &self.context.config().web
    }

    /// API key required on `/v1`, if one is configured
    pub fn api_key(&self) -> Option<&str> {
        self.web_config()
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
    }
}
