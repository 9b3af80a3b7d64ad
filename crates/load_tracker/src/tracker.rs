use futures::future::{self, BoxFuture, Either};
use futures::FutureExt as _;
use parking_lot::Mutex;
use serde::Serialize;
use smol::Executor;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::LoaderConfig;
use crate::discovery::DiscoverySubscription;
use crate::document::{Document, ReadyState};
use crate::probe::{ProbeError, ResourceProbe};
use crate::resource::{Resource, ResourceKey, ResourceKind, is_inline_payload};
use crate::timers::Timers;

pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;
pub type ProgressListener = Arc<dyn Fn(&LoadProgress) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Loading,
    /// Completion was reached; listeners are notified after a short delay.
    Completing,
    /// Listeners have been notified.
    Complete,
}

/// What the loading screen renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadProgress {
    pub loaded: usize,
    pub total: usize,
    /// `loaded / total`, or 0 with nothing tracked.
    pub ratio: f64,
    pub phase: LoadPhase,
    /// Completion came from the timeout rather than from every resource settling.
    pub forced: bool,
    pub status: String,
}

impl LoadProgress {
    pub fn is_complete(&self) -> bool {
        self.phase != LoadPhase::Loading
    }

    /// Width of the progress bar. A completed load always shows a full bar.
    pub fn percent(&self) -> u32 {
        if self.is_complete() {
            100
        } else {
            (self.ratio * 100.0).round() as u32
        }
    }

    /// Resource counter, `N / M`.
    pub fn counter(&self) -> String {
        format!("{} / {}", self.loaded, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugInfo {
    pub total: usize,
    pub loaded: usize,
    pub progress: f64,
    pub resources: Vec<ResourceDebugInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDebugInfo {
    pub key: String,
    pub kind: ResourceKind,
    pub url: String,
    pub loaded: bool,
}

/// Tracks every resource the page needs to look ready and signals once when
/// they have all settled.
///
/// Failed loads count the same as successful ones: the tracker only cares
/// that the browser finished trying. An absolute timeout guarantees the
/// signal fires even if something never settles.
#[derive(Clone)]
pub struct LoadTracker {
    pub(crate) inner: Arc<TrackerInner>,
}

pub(crate) struct TrackerInner {
    pub(crate) config: LoaderConfig,
    pub(crate) executor: Arc<Executor<'static>>,
    timers: Arc<dyn Timers>,
    probe: Arc<dyn ResourceProbe>,
    pub(crate) state: Mutex<TrackerState>,
}

struct TrackedResource {
    resource: Resource,
    loaded: bool,
}

enum StartState {
    Idle,
    /// `start` was called before the document became interactive.
    WaitingForDocument(Arc<dyn Document>),
    Started,
}

pub(crate) struct TrackerState {
    resources: Vec<TrackedResource>,
    index: HashMap<ResourceKey, usize>,
    /// Locators seen by discovery, shared by the initial sweep and the observer.
    pub(crate) discovered_urls: HashSet<String>,
    loaded: usize,
    ready_state: ReadyState,
    phase: LoadPhase,
    forced: bool,
    status: String,
    callbacks: Vec<CompletionCallback>,
    progress_listeners: Vec<ProgressListener>,
    start: StartState,
    empty_grace_armed: bool,
    discovery: Option<DiscoverySubscription>,
}

impl TrackerState {
    fn ratio(&self) -> f64 {
        if self.resources.is_empty() {
            0.0
        } else {
            (self.loaded as f64 / self.resources.len() as f64).min(1.0)
        }
    }

    fn progress(&self) -> LoadProgress {
        LoadProgress {
            loaded: self.loaded,
            total: self.resources.len(),
            ratio: self.ratio(),
            phase: self.phase,
            forced: self.forced,
            status: self.status.clone(),
        }
    }

    fn loading_status(&self) -> String {
        let total = self.resources.len();
        let mut status = format!("Loading... {}%", (self.ratio() * 100.0).round() as u32);
        if total > 0 {
            status.push_str(&format!(" ({}/{})", self.loaded, total));
        }
        status
    }
}

enum NextStep {
    Nothing,
    Dispatch,
    ArmEmptyPageGrace,
}

impl LoadTracker {
    pub fn new(
        config: LoaderConfig,
        executor: Arc<Executor<'static>>,
        timers: Arc<dyn Timers>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                executor,
                timers,
                probe,
                state: Mutex::new(TrackerState {
                    resources: Vec::new(),
                    index: HashMap::default(),
                    discovered_urls: HashSet::default(),
                    loaded: 0,
                    ready_state: ReadyState::Loading,
                    phase: LoadPhase::Loading,
                    forced: false,
                    status: String::new(),
                    callbacks: Vec::new(),
                    progress_listeners: Vec::new(),
                    start: StartState::Idle,
                    empty_grace_armed: false,
                    discovery: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> Weak<TrackerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<TrackerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.inner.executor.spawn(future).detach();
    }

    /// Run `f` after `delay`, unless the tracker is gone by then.
    fn after(&self, delay: Duration, f: impl FnOnce(LoadTracker) + Send + 'static) {
        let timer = self.inner.timers.timer(delay);
        let this = self.downgrade();
        self.spawn(async move {
            timer.await;
            if let Some(this) = LoadTracker::upgrade(&this) {
                f(this);
            }
        });
    }

    /// Begin the loading phase against `document`.
    ///
    /// Discovery starts as soon as the document is interactive (immediately if
    /// it already is), and arms the absolute timeout and the first completion
    /// check. Calling this more than once has no effect.
    pub fn start(&self, document: Arc<dyn Document>) {
        let ready_state = document.ready_state();
        let document = {
            let mut state = self.inner.state.lock();
            if !matches!(state.start, StartState::Idle) {
                return;
            }
            state.ready_state = state.ready_state.max(ready_state);
            if state.ready_state < ReadyState::Interactive {
                state.start = StartState::WaitingForDocument(document);
                return;
            }
            state.start = StartState::Started;
            document
        };
        self.begin_tracking(document.as_ref());
    }

    fn begin_tracking(&self, document: &dyn Document) {
        self.inner.state.lock().status = "Initializing...".into();

        let subscription = self.discover_initial_resources(document);
        if self.inner.config.track_fonts {
            self.register_resource(Resource::FontBundle {
                name: "web-fonts".into(),
            });
        }
        self.inner.state.lock().discovery = Some(subscription);
        self.notify_progress();

        self.after(self.inner.config.max_loading_time(), |this| {
            this.force_complete()
        });
        self.after(self.inner.config.initial_check_delay(), |this| {
            this.evaluate_completion()
        });
    }

    /// The document moved forward in its lifecycle. Earlier states are ignored.
    pub fn set_ready_state(&self, ready_state: ReadyState) {
        let pending_document = {
            let mut state = self.inner.state.lock();
            if ready_state <= state.ready_state {
                return;
            }
            state.ready_state = ready_state;
            match std::mem::replace(&mut state.start, StartState::Idle) {
                StartState::WaitingForDocument(document)
                    if ready_state >= ReadyState::Interactive =>
                {
                    state.start = StartState::Started;
                    Some(document)
                }
                start => {
                    state.start = start;
                    None
                }
            }
        };

        if let Some(document) = pending_document {
            self.begin_tracking(document.as_ref());
        }
        self.evaluate_completion();
    }

    /// Stop discovering resources inserted into the document. Returns whether
    /// discovery was running.
    pub fn stop_discovery(&self) -> bool {
        let subscription = self.inner.state.lock().discovery.take();
        match subscription {
            Some(subscription) => {
                subscription.stop();
                true
            }
            None => false,
        }
    }

    /// Start tracking `resource`.
    ///
    /// Returns `None` without counting anything when the locator is inline or
    /// the `(kind, url)` pair is already tracked.
    pub fn register_resource(&self, resource: Resource) -> Option<ResourceKey> {
        if is_inline_payload(resource.url()) {
            log::debug!("not tracking inline {}", resource.kind());
            return None;
        }

        let key = resource.key();
        {
            let mut state = self.inner.state.lock();
            if state.index.contains_key(&key) {
                return None;
            }
            let ix = state.resources.len();
            state.index.insert(key.clone(), ix);
            state.resources.push(TrackedResource {
                resource: resource.clone(),
                loaded: false,
            });
            state.status = format!("Loading {}...", key.kind);
        }

        log::debug!("tracking {key}");
        self.notify_progress();
        self.spawn_probe(resource, key.clone());
        Some(key)
    }

    fn spawn_probe(&self, resource: Resource, key: ResourceKey) {
        let probe = self.inner.probe.clone();
        let load: BoxFuture<'static, Result<(), ProbeError>> = match resource {
            Resource::Image { url, .. } | Resource::BackgroundImage { url, .. } => {
                async move { probe.load_image(&url).await }.boxed()
            }
            Resource::Stylesheet {
                url,
                element: Some(element),
            } => async move { probe.load_stylesheet(&url, element).await }.boxed(),
            Resource::Stylesheet { element: None, .. } => future::ready(Ok(())).boxed(),
            Resource::FontBundle { name } => {
                let after = self.inner.config.font_timeout();
                let timeout = self.inner.timers.timer(after);
                async move {
                    match future::select(probe.fonts_ready(), timeout).await {
                        Either::Left((result, _)) => result,
                        Either::Right(_) => Err(ProbeError::TimedOut { what: name, after }),
                    }
                }
                .boxed()
            }
            // Settled by the caller through its `DataLoadHandle`.
            Resource::DataHandle { .. } => return,
        };

        let this = self.downgrade();
        self.spawn(async move {
            if let Err(error) = load.await {
                log::warn!("{error}; counting {key} as loaded");
            }
            if let Some(this) = LoadTracker::upgrade(&this) {
                this.mark_loaded(&key);
            }
        });
    }

    /// Record that the browser finished with `key`. Repeated calls and unknown
    /// keys change nothing, but completion is re-evaluated either way.
    pub fn mark_loaded(&self, key: &ResourceKey) {
        let changed = {
            let mut state = self.inner.state.lock();
            match state.index.get(key).copied() {
                Some(ix) if !state.resources[ix].loaded => {
                    state.resources[ix].loaded = true;
                    state.loaded += 1;
                    if state.phase == LoadPhase::Loading {
                        state.status = state.loading_status();
                    }
                    true
                }
                _ => false,
            }
        };

        if changed {
            self.notify_progress();
        }
        self.evaluate_completion();
    }

    /// Register an in-flight data fetch. The returned handle settles it.
    pub fn track_external_data_load(&self, name: &str) -> DataLoadHandle {
        let resource = Resource::DataHandle {
            name: name.to_string(),
        };
        let key = resource.key();
        self.register_resource(resource);
        DataLoadHandle {
            tracker: self.downgrade(),
            key: Some(key),
        }
    }

    /// Check the completion condition; safe to call after any state change.
    pub fn evaluate_completion(&self) {
        let next = {
            let mut state = self.inner.state.lock();
            let total = state.resources.len();
            if state.phase != LoadPhase::Loading || state.ready_state != ReadyState::Complete {
                NextStep::Nothing
            } else if total > 0 && state.loaded >= total {
                state.phase = LoadPhase::Completing;
                state.status = "Complete!".into();
                NextStep::Dispatch
            } else if total == 0 && !state.empty_grace_armed {
                state.empty_grace_armed = true;
                NextStep::ArmEmptyPageGrace
            } else {
                NextStep::Nothing
            }
        };

        match next {
            NextStep::Nothing => {}
            NextStep::Dispatch => {
                log::info!("all {} tracked resources settled", self.total_resources());
                self.notify_progress();
                self.after(self.inner.config.completion_delay(), |this| {
                    this.dispatch_completion()
                });
            }
            NextStep::ArmEmptyPageGrace => {
                self.after(self.inner.config.empty_page_grace(), |this| {
                    this.finish_empty_page()
                });
            }
        }
    }

    fn finish_empty_page(&self) {
        let completed = {
            let mut state = self.inner.state.lock();
            if state.phase == LoadPhase::Loading && state.resources.is_empty() {
                state.phase = LoadPhase::Completing;
                state.status = "Ready!".into();
                true
            } else {
                state.empty_grace_armed = false;
                false
            }
        };

        if completed {
            log::info!("nothing to track, page is ready");
            self.notify_progress();
            self.dispatch_completion();
        } else {
            self.evaluate_completion();
        }
    }

    fn force_complete(&self) {
        let (loaded, total) = {
            let mut state = self.inner.state.lock();
            if state.phase != LoadPhase::Loading {
                return;
            }
            state.phase = LoadPhase::Completing;
            state.forced = true;
            state.status = "Ready!".into();
            (state.loaded, state.resources.len())
        };

        log::warn!("loading timed out with {loaded}/{total} resources settled, forcing completion");
        self.notify_progress();
        self.after(self.inner.config.forced_completion_delay(), |this| {
            this.dispatch_completion()
        });
    }

    fn dispatch_completion(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.phase == LoadPhase::Complete {
                return;
            }
            state.phase = LoadPhase::Complete;
            std::mem::take(&mut state.callbacks)
        };

        log::info!("loading complete, notifying {} listeners", callbacks.len());
        self.notify_progress();
        for callback in callbacks {
            callback();
        }
    }

    /// Run `callback` once loading completes.
    ///
    /// Callbacks run in registration order. Once completion has been
    /// delivered, new callbacks run on the next executor turn instead of
    /// re-entrantly.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.phase == LoadPhase::Complete {
            drop(state);
            self.spawn(async move { callback() });
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Called with a fresh snapshot after every change in progress.
    pub fn on_progress(&self, listener: impl Fn(&LoadProgress) + Send + Sync + 'static) {
        self.inner
            .state
            .lock()
            .progress_listeners
            .push(Arc::new(listener));
    }

    fn notify_progress(&self) {
        let (progress, listeners) = {
            let state = self.inner.state.lock();
            (state.progress(), state.progress_listeners.clone())
        };
        for listener in listeners {
            listener(&progress);
        }
    }

    pub fn progress_ratio(&self) -> f64 {
        self.inner.state.lock().ratio()
    }

    pub fn progress(&self) -> LoadProgress {
        self.inner.state.lock().progress()
    }

    pub fn phase(&self) -> LoadPhase {
        self.inner.state.lock().phase
    }

    /// Whether completion has been reached, even if listeners are still pending.
    pub fn is_complete(&self) -> bool {
        self.phase() != LoadPhase::Loading
    }

    pub fn total_resources(&self) -> usize {
        self.inner.state.lock().resources.len()
    }

    pub fn loaded_resources(&self) -> usize {
        self.inner.state.lock().loaded
    }

    pub fn is_loaded(&self, key: &ResourceKey) -> bool {
        let state = self.inner.state.lock();
        state
            .index
            .get(key)
            .is_some_and(|ix| state.resources[*ix].loaded)
    }

    pub fn debug_info(&self) -> DebugInfo {
        let state = self.inner.state.lock();
        DebugInfo {
            total: state.resources.len(),
            loaded: state.loaded,
            progress: state.ratio() * 100.0,
            resources: state
                .resources
                .iter()
                .map(|tracked| ResourceDebugInfo {
                    key: tracked.resource.key().to_string(),
                    kind: tracked.resource.kind(),
                    url: tracked.resource.url().to_string(),
                    loaded: tracked.loaded,
                })
                .collect(),
        }
    }
}

/// Settles one tracked data fetch.
///
/// Call [`DataLoadHandle::finish`] when the fetch settles. A handle dropped
/// without finishing settles too, so a forgotten fetch cannot hold the page.
#[must_use]
pub struct DataLoadHandle {
    tracker: Weak<TrackerInner>,
    key: Option<ResourceKey>,
}

impl DataLoadHandle {
    pub fn key(&self) -> Option<&ResourceKey> {
        self.key.as_ref()
    }

    pub fn finish(mut self, success: bool) {
        if !success {
            if let Some(key) = &self.key {
                log::warn!("{key} failed; counting it as loaded");
            }
        }
        self.settle();
    }

    fn settle(&mut self) {
        if let Some(key) = self.key.take() {
            if let Some(tracker) = LoadTracker::upgrade(&self.tracker) {
                tracker.mark_loaded(&key);
            }
        }
    }
}

impl Drop for DataLoadHandle {
    fn drop(&mut self) {
        self.settle();
    }
}
