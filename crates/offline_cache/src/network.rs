//! The network seam the worker fetches through.

use async_trait::async_trait;
use std::sync::Arc;

use crate::request::{FetchRequest, FetchResponse};

/// A transport-level failure. HTTP error statuses are not network errors:
/// a 404 is a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("network unreachable while fetching {url}")]
    Offline { url: String },
    #[error("failed to fetch {url}: {message}")]
    Failed { url: String, message: String },
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError>;
}

#[async_trait]
impl<N: Network + ?Sized> Network for Arc<N> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError> {
        (**self).fetch(request).await
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeNetwork;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use http::StatusCode;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// An in-memory network with canned routes, an online switch, and a log of
    /// every request that reached it.
    #[derive(Default)]
    pub struct FakeNetwork {
        state: Mutex<FakeNetworkState>,
    }

    #[derive(Default)]
    struct FakeNetworkState {
        offline: bool,
        routes: HashMap<String, FakeNetworkRoute>,
        requests: Vec<String>,
    }

    enum FakeNetworkRoute {
        Respond(FetchResponse),
        Fail(String),
    }

    impl FakeNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Serve `body` with a 200 for `url`.
        pub fn serve(&self, url: &str, body: &str) {
            self.respond(url, FetchResponse::ok(body.to_string()));
        }

        pub fn respond(&self, url: &str, response: FetchResponse) {
            self.state
                .lock()
                .routes
                .insert(url.to_string(), FakeNetworkRoute::Respond(response));
        }

        /// Make fetches of `url` fail at the transport level.
        pub fn fail(&self, url: &str, message: &str) {
            self.state
                .lock()
                .routes
                .insert(url.to_string(), FakeNetworkRoute::Fail(message.to_string()));
        }

        pub fn set_offline(&self, offline: bool) {
            self.state.lock().offline = offline;
        }

        /// URLs of every request that reached the network, in order.
        pub fn requests(&self) -> Vec<String> {
            self.state.lock().requests.clone()
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.state
                .lock()
                .requests
                .iter()
                .filter(|requested| requested.as_str() == url)
                .count()
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError> {
            let url = request.url.to_string();
            let mut state = self.state.lock();
            state.requests.push(url.clone());
            if state.offline {
                return Err(NetworkError::Offline { url });
            }
            match state.routes.get(&url) {
                Some(FakeNetworkRoute::Respond(response)) => Ok(response.clone()),
                Some(FakeNetworkRoute::Fail(message)) => Err(NetworkError::Failed {
                    url,
                    message: message.clone(),
                }),
                None => Ok(FetchResponse::new(StatusCode::NOT_FOUND, "Not Found")),
            }
        }
    }
}
