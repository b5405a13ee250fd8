//! Demo operations served by `bulk-process-server`.
//!
//! Both run against a seeded [`DemoStore`] so the full wizard can be driven
//! without an external database.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{BulkProcessError, Result};
use crate::operation::{BatchItem, BulkOperation, ItemOutcome};
use crate::registry::OperationRegistry;

const PROCESSED_META_KEY: &str = "_bulk_processed";
const GENERATED_PASSWORD_LENGTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoUser {
    pub id: u64,
    pub login: String,
    pub locked: bool,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoPost {
    pub id: u64,
    pub title: String,
    pub meta: BTreeMap<String, String>,
}

/// In-memory users and posts, ordered by id
#[derive(Debug, Default)]
pub struct DemoStore {
    users: RwLock<BTreeMap<u64, DemoUser>>,
    posts: RwLock<BTreeMap<u64, DemoPost>>,
}

impl DemoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `users` users and `posts` posts.
    ///
    /// Every seventh user is locked and every fifth post is already processed,
    /// so runs show all three outcomes.
    pub fn seeded(users: u64, posts: u64) -> Self {
        let store = Self::new();
        {
            let mut table = store.users.write();
            for id in 1..=users {
                table.insert(
                    id,
                    DemoUser {
                        id,
                        login: format!("user{id:04}"),
                        locked: id % 7 == 0,
                        password_hash: String::new(),
                    },
                );
            }
        }
        {
            let mut table = store.posts.write();
            for id in 1..=posts {
                let mut meta = BTreeMap::new();
                if id % 5 == 0 {
                    meta.insert(PROCESSED_META_KEY.to_string(), "yes".to_string());
                }
                table.insert(
                    id,
                    DemoPost {
                        id,
                        title: format!("Sample post {id}"),
                        meta,
                    },
                );
            }
        }
        store
    }

    pub fn user(&self, id: u64) -> Option<DemoUser> {
        self.users.read().get(&id).cloned()
    }

    pub fn post(&self, id: u64) -> Option<DemoPost> {
        self.posts.read().get(&id).cloned()
    }

    /// Remove a post, e.g. to simulate deletion between fetch and process
    pub fn delete_post(&self, id: u64) -> Option<DemoPost> {
        self.posts.write().remove(&id)
    }

    pub fn user_count(&self) -> u64 {
        self.users.read().len() as u64
    }

    pub fn post_count(&self) -> u64 {
        self.posts.read().len() as u64
    }
}

fn parse_key(operation: &str, item: &BatchItem) -> Result<u64> {
    item.key.parse().map_err(|_| {
        BulkProcessError::operation_failed(operation, format!("invalid record key '{}'", item.key))
    })
}

/// Regenerates the password of every unlocked user
#[derive(Debug)]
pub struct RegeneratePasswords {
    store: Arc<DemoStore>,
}

impl RegeneratePasswords {
    pub const NAME: &'static str = "regenerate_passwords";

    pub fn new(store: Arc<DemoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BulkOperation for RegeneratePasswords {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn label(&self) -> &str {
        "Regenerate user passwords"
    }

    fn description(&self) -> &str {
        "Assign a new random password to every user account that is not locked"
    }

    async fn total_items(&self) -> Result<u64> {
        Ok(self.store.user_count())
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<Vec<BatchItem>> {
        Ok(self
            .store
            .users
            .read()
            .values()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .map(|user| {
                BatchItem::new(user.id.to_string(), user.login.clone())
                    .with_data(json!({ "locked": user.locked }))
            })
            .collect())
    }

    async fn process(&self, item: &BatchItem) -> Result<ItemOutcome> {
        let id = parse_key(Self::NAME, item)?;
        let mut users = self.store.users.write();
        let user = users.get_mut(&id).ok_or_else(|| {
            BulkProcessError::operation_failed(Self::NAME, format!("user {id} no longer exists"))
        })?;

        if user.locked {
            return Ok(ItemOutcome::skipped("account is locked"));
        }

        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_PASSWORD_LENGTH)
            .map(char::from)
            .collect();
        user.password_hash = hex::encode(Sha256::digest(password.as_bytes()));

        Ok(ItemOutcome::success().with_message("password regenerated"))
    }
}

/// Marks every post with a processed meta flag
#[derive(Debug)]
pub struct UpdatePostMeta {
    store: Arc<DemoStore>,
}

impl UpdatePostMeta {
    pub const NAME: &'static str = "update_post_meta";

    pub fn new(store: Arc<DemoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BulkOperation for UpdatePostMeta {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn label(&self) -> &str {
        "Update post meta"
    }

    fn description(&self) -> &str {
        "Set the processed flag on every post that does not have it yet"
    }

    fn batch_size(&self) -> Option<u32> {
        Some(25)
    }

    async fn total_items(&self) -> Result<u64> {
        Ok(self.store.post_count())
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<Vec<BatchItem>> {
        Ok(self
            .store
            .posts
            .read()
            .values()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .map(|post| BatchItem::new(post.id.to_string(), post.title.clone()))
            .collect())
    }

    async fn process(&self, item: &BatchItem) -> Result<ItemOutcome> {
        let id = parse_key(Self::NAME, item)?;
        let mut posts = self.store.posts.write();
        let post = posts.get_mut(&id).ok_or_else(|| {
            BulkProcessError::operation_failed(Self::NAME, format!("post {id} no longer exists"))
        })?;

        if post.meta.contains_key(PROCESSED_META_KEY) {
            return Ok(ItemOutcome::skipped("already processed"));
        }

        post.meta
            .insert(PROCESSED_META_KEY.to_string(), "yes".to_string());
        Ok(ItemOutcome::success())
    }
}

/// Register both demo operations against a shared store
pub fn register_demo_operations(registry: &OperationRegistry, store: Arc<DemoStore>) -> Result<()> {
    registry.register(Arc::new(RegeneratePasswords::new(store.clone())))?;
    registry.register(Arc::new(UpdatePostMeta::new(store)))?;
    Ok(())
}
