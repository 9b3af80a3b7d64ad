use async_trait::async_trait;
use std::time::Duration;

use crate::resource::ElementId;

/// Why a probe ended without a clean load. The tracker logs these and counts
/// the resource as finished anyway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to load {url}: {reason}")]
    Failed { url: String, reason: String },
    #[error("{what} not ready after {after:?}")]
    TimedOut { what: String, after: Duration },
}

/// Observes the browser finishing with a resource.
///
/// Each method resolves once the browser is done trying, successfully or not.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Load `url` into a detached image and wait for load or error.
    async fn load_image(&self, url: &str) -> Result<(), ProbeError>;

    /// Wait for a stylesheet link element to have its sheet, or to error.
    async fn load_stylesheet(&self, url: &str, element: ElementId) -> Result<(), ProbeError>;

    /// Wait for the document's fonts to be ready.
    async fn fonts_ready(&self) -> Result<(), ProbeError>;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProbe;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use futures::channel::oneshot;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    const FONTS: &str = "fonts";

    /// A probe whose loads stay pending until the test settles them.
    #[derive(Default)]
    pub struct FakeProbe {
        state: Mutex<FakeProbeState>,
    }

    #[derive(Default)]
    struct FakeProbeState {
        settled: HashMap<String, Result<(), ProbeError>>,
        waiting: HashMap<String, Vec<oneshot::Sender<Result<(), ProbeError>>>>,
        started: Vec<String>,
    }

    impl FakeProbe {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Settle `url` successfully, now and for later probes.
        pub fn succeed(&self, url: &str) {
            self.settle(url, Ok(()));
        }

        pub fn fail(&self, url: &str) {
            self.settle(
                url,
                Err(ProbeError::Failed {
                    url: url.to_string(),
                    reason: "404 Not Found".into(),
                }),
            );
        }

        pub fn fonts_loaded(&self) {
            self.settle(FONTS, Ok(()));
        }

        fn settle(&self, url: &str, result: Result<(), ProbeError>) {
            let waiting = {
                let mut state = self.state.lock();
                state.settled.insert(url.to_string(), result.clone());
                state.waiting.remove(url).unwrap_or_default()
            };
            for tx in waiting {
                tx.send(result.clone()).ok();
            }
        }

        /// Every locator probed so far, in order.
        pub fn started(&self) -> Vec<String> {
            self.state.lock().started.clone()
        }

        /// Locators with a probe still waiting.
        pub fn pending(&self) -> Vec<String> {
            let mut pending: Vec<_> = self.state.lock().waiting.keys().cloned().collect();
            pending.sort();
            pending
        }

        async fn wait(&self, url: &str) -> Result<(), ProbeError> {
            let rx = {
                let mut state = self.state.lock();
                state.started.push(url.to_string());
                if let Some(result) = state.settled.get(url) {
                    return result.clone();
                }
                let (tx, rx) = oneshot::channel();
                state.waiting.entry(url.to_string()).or_default().push(tx);
                rx
            };
            rx.await.unwrap_or_else(|_| {
                Err(ProbeError::Failed {
                    url: url.to_string(),
                    reason: "probe dropped".into(),
                })
            })
        }
    }

    #[async_trait]
    impl ResourceProbe for FakeProbe {
        async fn load_image(&self, url: &str) -> Result<(), ProbeError> {
            self.wait(url).await
        }

        async fn load_stylesheet(&self, url: &str, _element: ElementId) -> Result<(), ProbeError> {
            self.wait(url).await
        }

        async fn fonts_ready(&self) -> Result<(), ProbeError> {
            self.wait(FONTS).await
        }
    }
}
