//! Per-document LRU cache bounding memory on long editor sessions (§4.9).

use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

/// Upper bound on the number of open documents cached at once.
pub const CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct DocumentState {
    pub text: String,
    pub version: i64,
}

pub struct DocumentCache {
    inner: Mutex<LruCache<String, DocumentState>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self { inner: Mutex::new(LruCache::new(NonZeroUsize::new(CAPACITY).unwrap())) }
    }

    pub async fn open(&self, uri: impl Into<String>, text: impl Into<String>, version: i64) {
        self.inner.lock().await.put(uri.into(), DocumentState { text: text.into(), version });
    }

    pub async fn update(&self, uri: &str, text: impl Into<String>, version: i64) {
        let mut guard = self.inner.lock().await;
        if let Some(doc) = guard.get_mut(uri) {
            doc.text = text.into();
            doc.version = version;
        } else {
            guard.put(uri.to_string(), DocumentState { text: text.into(), version });
        }
    }

    pub async fn get(&self, uri: &str) -> Option<DocumentState> {
        self.inner.lock().await.get(uri).cloned()
    }

    pub async fn close(&self, uri: &str) {
        self.inner.lock().await.pop(uri);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicts_oldest_beyond_capacity() {
        let cache = DocumentCache::new();
        for i in 0..CAPACITY + 10 {
            cache.open(format!("file:///{i}.rs"), "text", 1).await;
        }
        assert_eq!(cache.len().await, CAPACITY);
        assert!(cache.get("file:///0.rs").await.is_none());
        assert!(cache.get(&format!("file:///{}.rs", CAPACITY + 9)).await.is_some());
    }
}
