//! Generic registry for thread-safe storage of named components.
//!
//! This wraps the `Arc<RwLock<HashMap<String, Arc<T>>>>` pattern used for
//! runtime tables that are read on every request but written only on
//! connect/disconnect, such as the live agent-connection table.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe registry for named components.
#[derive(Debug)]
pub struct Registry<T> {
    items: Arc<RwLock<HashMap<String, Arc<T>>>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get a component by id.
    pub async fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.read().await.get(id).cloned()
    }

    /// Check if a component exists.
    pub async fn contains(&self, id: &str) -> bool {
        self.items.read().await.contains_key(id)
    }

    /// Insert a component, returning the previous value if any.
    pub async fn insert(&self, id: impl Into<String>, item: Arc<T>) -> Option<Arc<T>> {
        self.items.write().await.insert(id.into(), item)
    }

    /// Remove a component by id.
    pub async fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.items.write().await.remove(id)
    }

    /// Remove a component only if the stored value is the same allocation
    /// as `expected`. Used to avoid a late-exiting connection task evicting
    /// the replacement that took its slot.
    pub async fn remove_if_same(&self, id: &str, expected: &Arc<T>) -> bool {
        let mut guard = self.items.write().await;
        if let Some(current) = guard.get(id) {
            if Arc::ptr_eq(current, expected) {
                guard.remove(id);
                return true;
            }
        }
        false
    }

    /// Get all component ids.
    pub async fn keys(&self) -> Vec<String> {
        self.items.read().await.keys().cloned().collect()
    }

    /// Get the number of components.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Get a snapshot of all items.
    pub async fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        self.items
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_returns_previous_value() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.insert("a", Arc::new(1)).await.is_none());
        let prev = registry.insert("a", Arc::new(2)).await;
        assert_eq!(*prev.unwrap(), 1);
        assert_eq!(*registry.get("a").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_if_same_only_removes_matching_arc() {
        let registry: Registry<u32> = Registry::new();
        let first = Arc::new(1);
        registry.insert("a", first.clone()).await;

        let replacement = Arc::new(2);
        registry.insert("a", replacement.clone()).await;

        // The evicted connection must not remove its replacement.
        assert!(!registry.remove_if_same("a", &first).await);
        assert_eq!(*registry.get("a").await.unwrap(), 2);

        assert!(registry.remove_if_same("a", &replacement).await);
        assert!(registry.get("a").await.is_none());
    }
}
