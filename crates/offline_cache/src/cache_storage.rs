//! Named cache stores, modelled on the browser's `CacheStorage`.
//!
//! Each [`Cache`] maps a request identity (method + URL) to the most recent
//! response stored for it. Writes to a cache are serialized by its lock, so
//! overlapping fetch handlers storing the same key resolve as last write wins.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::network::{Network, NetworkError};
use crate::request::{CacheKey, FetchRequest, FetchResponse};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("failed to fetch {url} for caching")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },
    #[error("refusing to cache {url}: server answered {status}")]
    BadStatus { url: String, status: http::StatusCode },
}

impl CacheError {
    pub fn url(&self) -> &str {
        match self {
            CacheError::Network { url, .. } | CacheError::BadStatus { url, .. } => url,
        }
    }
}

/// All cache stores of one origin, in creation order.
#[derive(Default)]
pub struct CacheStorage {
    caches: Mutex<Vec<Arc<Cache>>>,
}

impl CacheStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open the cache named `name`, creating it if needed.
    pub fn open(&self, name: &str) -> Arc<Cache> {
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.iter().find(|cache| cache.name == name) {
            return cache.clone();
        }
        let cache = Arc::new(Cache::new(name));
        caches.push(cache.clone());
        cache
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.lock().iter().any(|cache| cache.name == name)
    }

    /// Cache names in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.caches
            .lock()
            .iter()
            .map(|cache| cache.name.clone())
            .collect()
    }

    /// Delete the cache named `name`. Returns whether it existed.
    pub fn delete(&self, name: &str) -> bool {
        let mut caches = self.caches.lock();
        let before = caches.len();
        caches.retain(|cache| cache.name != name);
        caches.len() != before
    }

    /// Look `request` up in every cache, oldest first.
    pub fn match_request(&self, request: &FetchRequest) -> Option<FetchResponse> {
        let key = request.cache_key();
        let caches = self.caches.lock().clone();
        caches.iter().find_map(|cache| cache.get(&key))
    }

    /// Look `request` up in `preferred` first, then in every other cache,
    /// oldest first.
    pub fn match_preferring(
        &self,
        preferred: &str,
        request: &FetchRequest,
    ) -> Option<FetchResponse> {
        let key = request.cache_key();
        let caches = self.caches.lock().clone();
        caches
            .iter()
            .find(|cache| cache.name == preferred)
            .and_then(|cache| cache.get(&key))
            .or_else(|| {
                caches
                    .iter()
                    .filter(|cache| cache.name != preferred)
                    .find_map(|cache| cache.get(&key))
            })
    }
}

/// A single named cache store.
pub struct Cache {
    name: String,
    entries: RwLock<HashMap<CacheKey, FetchResponse>>,
}

impl Cache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, request: &FetchRequest, response: FetchResponse) {
        self.entries.write().insert(request.cache_key(), response);
    }

    pub fn match_request(&self, request: &FetchRequest) -> Option<FetchResponse> {
        self.get(&request.cache_key())
    }

    fn get(&self, key: &CacheKey) -> Option<FetchResponse> {
        self.entries.read().get(key).cloned()
    }

    pub fn delete(&self, request: &FetchRequest) -> bool {
        self.entries.write().remove(&request.cache_key()).is_some()
    }

    /// Stored keys, sorted by URL.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort_by(|a, b| a.url.cmp(&b.url));
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch every request and store all responses, or store nothing.
    ///
    /// A transport failure or a non-2xx status for any entry fails the whole
    /// batch, and the first failure in request order is returned.
    pub async fn add_all(
        &self,
        requests: &[FetchRequest],
        network: &dyn Network,
    ) -> Result<(), CacheError> {
        let responses = join_all(requests.iter().map(|request| network.fetch(request))).await;

        let mut fetched = Vec::with_capacity(requests.len());
        for (request, response) in requests.iter().zip(responses) {
            let url = request.url.to_string();
            match response {
                Ok(response) if response.is_ok() => fetched.push((request, response)),
                Ok(response) => {
                    return Err(CacheError::BadStatus {
                        url,
                        status: response.status,
                    });
                }
                Err(source) => return Err(CacheError::Network { url, source }),
            }
        }

        let mut entries = self.entries.write();
        for (request, response) in fetched {
            entries.insert(request.cache_key(), response);
        }
        Ok(())
    }
}
