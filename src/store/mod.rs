//! Process-wide persistence of terminal responses, keyed by response id.

use crate::models::responses::Response;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::{EvictionPolicy, InMemoryConversationStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("response '{0}' not found")]
    NotFound(String),
    #[error("response '{0}' is already stored")]
    Conflict(String),
    #[error("response '{0}' is still in progress and cannot be stored")]
    NotTerminal(String),
    #[error("conversation store is closed")]
    Closed,
}

/// Write-once storage for finished responses.
///
/// Values are frozen `Arc<Response>`s: readers share them without copying and
/// never observe a partially written entry. There is no update operation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn put(&self, response: Arc<Response>) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Arc<Response>, StoreError>;

    /// Every stored response, oldest first.
    async fn list(&self) -> Result<Vec<Arc<Response>>, StoreError>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Teardown hook. After closing, `put` fails and `get` finds nothing.
    async fn close(&self);
}
