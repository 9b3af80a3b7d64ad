//! A worker registration across deployments: the currently active version,
//! an optional waiting version, and the cache storage they share.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::cache_storage::CacheStorage;
use crate::config::CacheConfig;
use crate::network::Network;
use crate::request::FetchRequest;
use crate::service_worker::{ActivationReport, FetchOutcome, GatewayError, ServiceWorker};

pub struct Registration {
    storage: Arc<CacheStorage>,
    network: Arc<dyn Network>,
    active: Mutex<Option<Arc<ServiceWorker>>>,
    waiting: Mutex<Option<Arc<ServiceWorker>>>,
}

impl Registration {
    pub fn new(storage: Arc<CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            storage,
            network,
            active: Mutex::new(None),
            waiting: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.active.lock().clone()
    }

    pub fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.waiting.lock().clone()
    }

    /// Install a new version.
    ///
    /// On success the worker activates right away when it skips waiting or
    /// nothing is active yet; otherwise it waits for [`Self::activate_waiting`].
    /// On failure the previously active version keeps serving.
    pub async fn install(&self, config: CacheConfig) -> Result<Arc<ServiceWorker>, GatewayError> {
        let worker = Arc::new(ServiceWorker::new(
            config,
            self.storage.clone(),
            self.network.clone(),
        ));
        worker.install().await?;

        if worker.config().skip_waiting || self.active.lock().is_none() {
            self.promote(worker.clone()).await?;
        } else if let Some(replaced) = self.waiting.lock().replace(worker.clone()) {
            replaced.retire();
        }
        Ok(worker)
    }

    /// Promote the waiting version, as happens once no page uses the old one.
    pub async fn activate_waiting(&self) -> Result<Option<ActivationReport>, GatewayError> {
        let Some(worker) = self.waiting.lock().take() else {
            return Ok(None);
        };
        self.promote(worker).await.map(Some)
    }

    async fn promote(&self, worker: Arc<ServiceWorker>) -> Result<ActivationReport, GatewayError> {
        let report = worker.activate().await?;
        let superseded = self.waiting.lock().take();
        if let Some(waiting) = superseded {
            log::info!(
                "{} superseded by {}",
                waiting.config().version,
                worker.config().version
            );
            waiting.retire();
        }
        if let Some(previous) = self.active.lock().replace(worker) {
            previous.retire();
        }
        Ok(report)
    }

    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        match self.active() {
            Some(worker) => worker.handle_fetch(request).await,
            None => FetchOutcome::Passthrough,
        }
    }

    pub async fn handle_periodic_sync(&self, tag: &str) -> bool {
        match self.active() {
            Some(worker) => worker.handle_periodic_sync(tag).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::FakeNetwork;
    use crate::service_worker::{ResponseSource, WorkerState};
    use pretty_assertions::assert_eq;
    use url::Url;

    const ORIGIN: &str = "http://localhost:8080";

    fn config(version: &str, skip_waiting: bool) -> CacheConfig {
        CacheConfig {
            version: version.into(),
            skip_waiting,
            static_manifest: vec!["/".into(), "/index.html".into()],
            ..CacheConfig::default()
        }
    }

    fn setup() -> (Arc<FakeNetwork>, Registration) {
        let _ = env_logger::builder().is_test(true).try_init();
        let network = FakeNetwork::new();
        network.serve(&format!("{ORIGIN}/"), "<html>v1</html>");
        network.serve(&format!("{ORIGIN}/index.html"), "<html>v1</html>");
        let registration = Registration::new(CacheStorage::new(), network.clone());
        (network, registration)
    }

    #[test]
    fn test_first_install_activates_even_without_skip_waiting() {
        let (_, registration) = setup();
        let worker = smol::block_on(registration.install(config("v1", false))).unwrap();
        assert_eq!(worker.state(), WorkerState::Active);
        assert!(registration.waiting().is_none());
    }

    #[test]
    fn test_version_bump_retires_old_worker_and_caches() {
        let (network, registration) = setup();
        let v1 = smol::block_on(registration.install(config("v1", true))).unwrap();
        let css = FetchRequest::get(Url::parse(&format!("{ORIGIN}/css/base.css")).unwrap());
        network.serve(&format!("{ORIGIN}/css/base.css"), "v1 css");
        smol::block_on(registration.handle_fetch(&css));
        assert_eq!(
            registration.storage().keys(),
            vec!["fixeq-static-v1", "fixeq-dynamic-v1"]
        );

        let v2 = smol::block_on(registration.install(config("v2", true))).unwrap();
        assert_eq!(v1.state(), WorkerState::Redundant);
        assert_eq!(v2.state(), WorkerState::Active);
        assert_eq!(registration.storage().keys(), vec!["fixeq-static-v2"]);

        network.serve(&format!("{ORIGIN}/css/base.css"), "v2 css");
        let outcome = smol::block_on(registration.handle_fetch(&css));
        let served = outcome.served().unwrap();
        assert_eq!(served.source, ResponseSource::Network);
        assert_eq!(served.response.body, "v2 css");
    }

    #[test]
    fn test_waiting_version_activates_on_demand() {
        let (_, registration) = setup();
        let v1 = smol::block_on(registration.install(config("v1", false))).unwrap();
        let v2 = smol::block_on(registration.install(config("v2", false))).unwrap();
        assert_eq!(v2.state(), WorkerState::Waiting);
        assert!(Arc::ptr_eq(&registration.active().unwrap(), &v1));

        let report = smol::block_on(registration.activate_waiting())
            .unwrap()
            .unwrap();
        assert_eq!(report.deleted, vec!["fixeq-static-v1"]);
        assert_eq!(v1.state(), WorkerState::Redundant);
        assert!(Arc::ptr_eq(&registration.active().unwrap(), &v2));
        assert!(smol::block_on(registration.activate_waiting()).unwrap().is_none());
    }

    #[test]
    fn test_skip_waiting_install_retires_older_waiting_version() {
        let (_, registration) = setup();
        smol::block_on(registration.install(config("v1", false))).unwrap();
        let v2 = smol::block_on(registration.install(config("v2", false))).unwrap();
        assert_eq!(v2.state(), WorkerState::Waiting);

        let v3 = smol::block_on(registration.install(config("v3", true))).unwrap();
        assert_eq!(v3.state(), WorkerState::Active);
        assert_eq!(v2.state(), WorkerState::Redundant);
        assert!(registration.waiting().is_none());

        assert!(smol::block_on(registration.activate_waiting()).unwrap().is_none());
        assert!(Arc::ptr_eq(&registration.active().unwrap(), &v3));
        assert_eq!(registration.storage().keys(), vec!["fixeq-static-v3"]);
    }

    #[test]
    fn test_failed_install_keeps_previous_version_serving() {
        let (network, registration) = setup();
        let v1 = smol::block_on(registration.install(config("v1", true))).unwrap();
        let keys = registration.storage().keys();

        network.set_offline(true);
        let result = smol::block_on(registration.install(config("v2", true)));
        assert!(result.is_err());
        assert_eq!(registration.storage().keys(), keys);
        assert!(Arc::ptr_eq(&registration.active().unwrap(), &v1));
        assert_eq!(v1.state(), WorkerState::Active);

        let outcome = smol::block_on(
            registration.handle_fetch(&FetchRequest::navigation(
                Url::parse(&format!("{ORIGIN}/index.html")).unwrap(),
            )),
        );
        assert_eq!(outcome.served().unwrap().source, ResponseSource::Cache);
    }

    #[test]
    fn test_no_active_worker_passes_through() {
        let (_, registration) = setup();
        let request = FetchRequest::get(Url::parse(&format!("{ORIGIN}/")).unwrap());
        assert_eq!(
            smol::block_on(registration.handle_fetch(&request)),
            FetchOutcome::Passthrough
        );
        assert!(!smol::block_on(registration.handle_periodic_sync("portfolio-update")));
    }
}
