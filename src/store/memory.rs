use super::{ConversationStore, StoreError};
use crate::models::responses::Response;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// How the in-memory store makes room for new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    #[default]
    Unbounded,
    /// Keep at most this many responses, dropping the oldest insertion first.
    Capacity(usize),
}

impl EvictionPolicy {
    /// `0` means unbounded.
    pub fn from_max_entries(max_entries: usize) -> Self {
        if max_entries == 0 {
            EvictionPolicy::Unbounded
        } else {
            EvictionPolicy::Capacity(max_entries)
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, Arc<Response>>,
    insertion_order: VecDeque<String>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    policy: EvictionPolicy,
    inner: RwLock<StoreInner>,
}

impl InMemoryConversationStore {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            inner: RwLock::new(StoreInner::default()),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn put(&self, response: Arc<Response>) -> Result<(), StoreError> {
        if !response.status.is_terminal() {
            return Err(StoreError::NotTerminal(response.id.clone()));
        }

        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        if inner.entries.contains_key(&response.id) {
            return Err(StoreError::Conflict(response.id.clone()));
        }

        inner.insertion_order.push_back(response.id.clone());
        inner.entries.insert(response.id.clone(), response);

        if let EvictionPolicy::Capacity(max) = self.policy {
            while inner.entries.len() > max {
                let Some(oldest) = inner.insertion_order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
                debug!("Evicted response {} from conversation store", oldest);
            }
        }

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Arc<Response>, StoreError> {
        self.inner
            .read()
            .await
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Arc<Response>>, StoreError> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        Ok(inner
            .insertion_order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect())
    }

    async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    async fn close(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.insertion_order.clear();
        inner.closed = true;
        info!("Conversation store closed ({} responses dropped)", dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::responses::ResponseStatus;
    use crate::web::responses::builders::ResponseBuilder;

    fn terminal(id: &str) -> Arc<Response> {
        let mut response = ResponseBuilder::new(id, "test-model").build();
        response.status = ResponseStatus::Completed;
        Arc::new(response)
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_arc() {
        let store = InMemoryConversationStore::default();
        let response = terminal("resp_a");
        store.put(response.clone()).await.unwrap();

        let fetched = store.get("resp_a").await.unwrap();
        assert!(Arc::ptr_eq(&response, &fetched));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = InMemoryConversationStore::default();
        assert_eq!(
            store.get("resp_missing").await.unwrap_err(),
            StoreError::NotFound("resp_missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_put_is_write_once() {
        let store = InMemoryConversationStore::default();
        store.put(terminal("resp_a")).await.unwrap();
        assert_eq!(
            store.put(terminal("resp_a")).await.unwrap_err(),
            StoreError::Conflict("resp_a".to_string())
        );
    }

    #[tokio::test]
    async fn test_put_rejects_in_progress() {
        let store = InMemoryConversationStore::default();
        let response = Arc::new(ResponseBuilder::new("resp_live", "m").build());
        assert!(matches!(
            store.put(response).await,
            Err(StoreError::NotTerminal(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_insertion() {
        let store = InMemoryConversationStore::new(EvictionPolicy::Capacity(2));
        store.put(terminal("resp_1")).await.unwrap();
        store.put(terminal("resp_2")).await.unwrap();
        store.put(terminal("resp_3")).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.get("resp_1").await.is_err());
        assert!(store.get("resp_2").await.is_ok());
        assert!(store.get("resp_3").await.is_ok());

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["resp_2", "resp_3"]);
    }

    #[tokio::test]
    async fn test_close_drops_entries_and_rejects_writes() {
        let store = InMemoryConversationStore::default();
        store.put(terminal("resp_1")).await.unwrap();
        store.close().await;

        assert!(store.get("resp_1").await.is_err());
        assert_eq!(
            store.put(terminal("resp_2")).await.unwrap_err(),
            StoreError::Closed
        );
        assert_eq!(store.list().await.unwrap_err(), StoreError::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writer() {
        let store = Arc::new(InMemoryConversationStore::default());
        store.put(terminal("resp_seed")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    store.put(terminal(&format!("resp_w{}", i))).await.unwrap();
                } else {
                    assert!(store.get("resp_seed").await.is_ok());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len().await, 5);
    }

    #[test]
    fn test_policy_from_max_entries() {
        assert_eq!(EvictionPolicy::from_max_entries(0), EvictionPolicy::Unbounded);
        assert_eq!(
            EvictionPolicy::from_max_entries(10),
            EvictionPolicy::Capacity(10)
        );
    }
}
