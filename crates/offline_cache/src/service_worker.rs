//! One deployed version of the offline worker: install, activate, and fetch
//! interception.

use http::{HeaderValue, Method, StatusCode, header};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::cache_storage::{CacheError, CacheStorage};
use crate::config::CacheConfig;
use crate::network::{Network, NetworkError};
use crate::request::{FetchRequest, FetchResponse};
use crate::strategy::{CacheStrategyDecision, Strategy, classify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, install not yet attempted.
    Parsed,
    Installing,
    /// Installed and waiting for the previous version to let go.
    Waiting,
    /// Controlling pages and intercepting fetches.
    Active,
    /// Replaced by a newer version, or failed to install.
    Redundant,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Parsed => write!(f, "parsed"),
            WorkerState::Installing => write!(f, "installing"),
            WorkerState::Waiting => write!(f, "waiting"),
            WorkerState::Active => write!(f, "active"),
            WorkerState::Redundant => write!(f, "redundant"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("install failed: could not cache {}", .0.url())]
    Install(#[source] CacheError),
    #[error("refresh failed: could not update {}", .0.url())]
    Refresh(#[source] CacheError),
    #[error("invalid URL {entry:?}")]
    InvalidUrl {
        entry: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cannot {action} a worker that is {state}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },
}

/// Where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// The cached root document, served to an offline navigation.
    OfflineShell,
    /// The synthetic 503 offline notice.
    OfflineNotice,
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseSource::Network => write!(f, "network"),
            ResponseSource::Cache => write!(f, "cache"),
            ResponseSource::OfflineShell => write!(f, "offline shell"),
            ResponseSource::OfflineNotice => write!(f, "offline notice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServedResponse {
    pub response: FetchResponse,
    pub source: ResponseSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not intercepted; the page talks to the network directly.
    Passthrough,
    Respond(ServedResponse),
}

impl FetchOutcome {
    pub fn served(&self) -> Option<&ServedResponse> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond(served) => Some(served),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    /// Cache stores from earlier deployments that were deleted.
    pub deleted: Vec<String>,
}

pub const OFFLINE_MESSAGE: &str = "You are currently offline. Please check your connection.";

pub struct ServiceWorker {
    config: CacheConfig,
    storage: Arc<CacheStorage>,
    network: Arc<dyn Network>,
    state: Mutex<WorkerState>,
}

impl ServiceWorker {
    pub fn new(config: CacheConfig, storage: Arc<CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            storage,
            network,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn transition(
        &self,
        action: &'static str,
        from: WorkerState,
        to: WorkerState,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(GatewayError::InvalidState {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Populate the static cache from the manifest.
    ///
    /// Any entry that cannot be cached fails the install and leaves the worker
    /// redundant; a partially cached shell is never activated.
    pub async fn install(&self) -> Result<(), GatewayError> {
        self.transition("install", WorkerState::Parsed, WorkerState::Installing)?;
        log::info!("installing offline worker {}", self.config.version);

        let result = self.cache_static_manifest().await;
        match &result {
            Ok(count) => {
                log::info!("cached {count} static files");
                *self.state.lock() = WorkerState::Waiting;
            }
            Err(error) => {
                log::error!("failed to cache static files: {error}");
                *self.state.lock() = WorkerState::Redundant;
            }
        }
        result.map(|_| ())
    }

    async fn cache_static_manifest(&self) -> Result<usize, GatewayError> {
        let mut requests = Vec::with_capacity(self.config.static_manifest.len());
        for entry in &self.config.static_manifest {
            let url = self
                .config
                .resolve(entry)
                .map_err(|source| GatewayError::InvalidUrl {
                    entry: entry.clone(),
                    source,
                })?;
            requests.push(FetchRequest::get(url));
        }

        let name = self.config.static_cache_name();
        let existed = self.storage.has(&name);
        let cache = self.storage.open(&name);
        if let Err(error) = cache.add_all(&requests, self.network.as_ref()).await {
            if !existed {
                self.storage.delete(&name);
            }
            return Err(GatewayError::Install(error));
        }
        Ok(requests.len())
    }

    /// Retire every cache store that is not part of this version, then start
    /// controlling pages.
    pub async fn activate(&self) -> Result<ActivationReport, GatewayError> {
        self.transition("activate", WorkerState::Waiting, WorkerState::Active)?;
        log::info!("activating offline worker {}", self.config.version);

        let mut report = ActivationReport::default();
        for name in self.storage.keys() {
            if !self.config.is_current_cache(&name) && self.storage.delete(&name) {
                log::info!("deleted old cache {name}");
                report.deleted.push(name);
            }
        }

        log::info!("offline worker {} activated", self.config.version);
        Ok(report)
    }

    /// Mark this worker as replaced. It stops intercepting fetches.
    pub fn retire(&self) {
        *self.state.lock() = WorkerState::Redundant;
    }

    pub fn decide(&self, request: &FetchRequest) -> CacheStrategyDecision {
        classify(request, &self.config)
    }

    /// Intercept one request from the page.
    ///
    /// Only active workers intercept, and only GET requests over http(s).
    /// Everything intercepted gets a response: a network failure with nothing
    /// cached ends in [`Self::offline_fallback`].
    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if self.state() != WorkerState::Active
            || request.method != Method::GET
            || !request.is_http()
        {
            return FetchOutcome::Passthrough;
        }

        let decision = self.decide(request);
        let result = match decision.strategy {
            Strategy::CacheFirst => self.cache_first(request, &decision).await,
            Strategy::NetworkFirst => self.network_first(request, &decision).await,
        };

        FetchOutcome::Respond(result.unwrap_or_else(|error| {
            log::error!("fetch of {} failed: {error}", request.url);
            self.offline_fallback(request)
        }))
    }

    async fn cache_first(
        &self,
        request: &FetchRequest,
        decision: &CacheStrategyDecision,
    ) -> Result<ServedResponse, NetworkError> {
        if let Some(response) = self.storage.match_request(request) {
            log::debug!("serving from cache: {}", request.url);
            return Ok(ServedResponse {
                response,
                source: ResponseSource::Cache,
            });
        }

        log::debug!("fetching from network: {}", request.url);
        let response = self.network.fetch(request).await?;
        self.store_runtime_copy(request, &response, decision);
        Ok(ServedResponse {
            response,
            source: ResponseSource::Network,
        })
    }

    async fn network_first(
        &self,
        request: &FetchRequest,
        decision: &CacheStrategyDecision,
    ) -> Result<ServedResponse, NetworkError> {
        log::debug!("trying network first: {}", request.url);
        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_runtime_copy(request, &response, decision);
                Ok(ServedResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(error) => {
                log::warn!("network failed, trying cache: {}", request.url);
                match self.storage.match_preferring(&decision.cache_name, request) {
                    Some(response) => Ok(ServedResponse {
                        response,
                        source: ResponseSource::Cache,
                    }),
                    None => Err(error),
                }
            }
        }
    }

    fn store_runtime_copy(
        &self,
        request: &FetchRequest,
        response: &FetchResponse,
        decision: &CacheStrategyDecision,
    ) {
        if response.is_ok() && self.config.is_cacheable(&request.url) {
            self.storage
                .open(&decision.cache_name)
                .put(request, response.clone());
        }
    }

    /// The last line of defense when neither network nor cache can answer.
    ///
    /// HTML navigations get the cached root document if there is one; every
    /// other request gets a JSON 503.
    pub fn offline_fallback(&self, request: &FetchRequest) -> ServedResponse {
        if request.accepts_html() {
            let dynamic_cache = self.config.dynamic_cache_name();
            let shell = self
                .config
                .resolve(&self.config.root_document)
                .ok()
                .and_then(|url| {
                    self.storage
                        .match_preferring(&dynamic_cache, &FetchRequest::get(url))
                });
            if let Some(response) = shell {
                return ServedResponse {
                    response,
                    source: ResponseSource::OfflineShell,
                };
            }
        }

        let body = serde_json::json!({
            "error": "Offline",
            "message": OFFLINE_MESSAGE,
        });
        let mut response = FetchResponse::new(StatusCode::SERVICE_UNAVAILABLE, body.to_string());
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        ServedResponse {
            response,
            source: ResponseSource::OfflineNotice,
        }
    }

    /// Handle a periodic background sync. Returns whether the tag was ours.
    ///
    /// Refresh failures are logged and otherwise ignored; this only warms the
    /// dynamic cache.
    pub async fn handle_periodic_sync(&self, tag: &str) -> bool {
        log::info!("periodic sync triggered: {tag}");
        if tag != self.config.sync_tag {
            return false;
        }
        if let Err(error) = self.refresh_data().await {
            log::error!("failed to check for updates: {error}");
        }
        true
    }

    async fn refresh_data(&self) -> Result<(), GatewayError> {
        let url = self
            .config
            .resolve(&self.config.refresh_url)
            .map_err(|source| GatewayError::InvalidUrl {
                entry: self.config.refresh_url.clone(),
                source,
            })?;
        let request = FetchRequest::get(url);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|source| {
                GatewayError::Refresh(CacheError::Network {
                    url: request.url.to_string(),
                    source,
                })
            })?;
        if !response.is_ok() {
            return Err(GatewayError::Refresh(CacheError::BadStatus {
                url: request.url.to_string(),
                status: response.status,
            }));
        }
        self.storage
            .open(&self.config.dynamic_cache_name())
            .put(&request, response);
        log::info!("refreshed {}", request.url);
        Ok(())
    }
}
