use futures::StreamExt as _;
use smol::Task;

use crate::document::{Document, InsertedNode, background_image_urls};
use crate::resource::{Resource, ResourceKey, is_inline_payload};
use crate::tracker::LoadTracker;

/// Keeps watching the document for inserted nodes.
///
/// Dropping the subscription (or calling [`DiscoverySubscription::stop`])
/// stops observation. Call [`DiscoverySubscription::detach`] to observe for as
/// long as the tracker lives.
#[must_use]
pub struct DiscoverySubscription {
    task: Option<Task<()>>,
}

impl DiscoverySubscription {
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            log::debug!("stopping resource discovery");
            drop(task);
        }
    }

    pub fn detach(mut self) {
        if let Some(task) = self.task.take() {
            task.detach();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl LoadTracker {
    /// Register every resource the document already references, then start
    /// observing insertions.
    ///
    /// Images and background images are deduplicated by locator across both
    /// kinds, and across the sweep and later insertions.
    pub fn discover_initial_resources(&self, document: &dyn Document) -> DiscoverySubscription {
        for image in document.images() {
            self.register_discovered(Resource::Image {
                url: image.src,
                element: Some(image.element),
            });
        }

        for styled in document.styled_elements() {
            for url in background_image_urls(&styled.background_image) {
                self.register_discovered(Resource::BackgroundImage {
                    url,
                    element: Some(styled.element),
                });
            }
        }

        let avatar = self.config().avatar_path.clone();
        self.register_discovered(Resource::image(avatar));

        for link in document.stylesheet_links() {
            if link.href.is_empty() {
                continue;
            }
            self.register_resource(Resource::Stylesheet {
                url: link.href,
                element: Some(link.element),
            });
        }

        let mut insertions = document.observe_insertions();
        let this = self.downgrade();
        let task = self.inner.executor.spawn(async move {
            while let Some(node) = insertions.next().await {
                let Some(this) = LoadTracker::upgrade(&this) else {
                    break;
                };
                this.register_inserted(node);
            }
        });

        log::debug!(
            "discovered {} resources, observing insertions",
            self.total_resources()
        );
        DiscoverySubscription { task: Some(task) }
    }

    fn register_discovered(&self, resource: Resource) -> Option<ResourceKey> {
        let url = resource.url();
        if url.is_empty() || is_inline_payload(url) {
            return None;
        }
        if !self
            .inner
            .state
            .lock()
            .discovered_urls
            .insert(url.to_string())
        {
            return None;
        }
        self.register_resource(resource)
    }

    fn register_inserted(&self, node: InsertedNode) {
        if let Some(src) = node.image_src {
            self.register_discovered(Resource::Image {
                url: src,
                element: node.element,
            });
        }
        if let Some(background_image) = node.background_image {
            for url in background_image_urls(&background_image) {
                self.register_discovered(Resource::BackgroundImage {
                    url,
                    element: node.element,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::document::{FakeDocument, ReadyState};
    use crate::probe::FakeProbe;
    use crate::timers::FakeTimers;
    use pretty_assertions::assert_eq;
    use smol::Executor;
    use std::sync::Arc;

    fn tracker() -> (Arc<Executor<'static>>, Arc<FakeProbe>, LoadTracker) {
        let _ = env_logger::builder().is_test(true).try_init();
        let executor = Arc::new(Executor::new());
        let probe = FakeProbe::new();
        let tracker = LoadTracker::new(
            LoaderConfig::default(),
            executor.clone(),
            FakeTimers::new(),
            probe.clone(),
        );
        (executor, probe, tracker)
    }

    fn run_until_parked(executor: &Executor) {
        while executor.try_tick() {}
    }

    fn tracked_keys(tracker: &LoadTracker) -> Vec<String> {
        tracker
            .debug_info()
            .resources
            .into_iter()
            .map(|resource| resource.key)
            .collect()
    }

    #[test]
    fn test_initial_sweep() {
        let (executor, probe, tracker) = tracker();
        let document = FakeDocument::new(ReadyState::Complete);
        document.add_image("assets/hero.webp");
        document.add_image("assets/hero.webp");
        document.add_image("data:image/gif;base64,R0lGODlhAQABAAAAACw=");
        document.add_image("");
        document.add_styled(r#"url("assets/grid.svg"), url("data:image/png;base64,AAAA")"#);
        document.add_styled(r#"url("assets/hero.webp")"#);
        document.add_stylesheet("css/main.css");
        document.add_stylesheet("");

        tracker.start(document);
        run_until_parked(&executor);

        assert_eq!(
            tracked_keys(&tracker),
            vec![
                "image:assets/hero.webp",
                "background-image:assets/grid.svg",
                "image:assets/avatar.jpg",
                "stylesheet:css/main.css",
            ]
        );
        assert_eq!(
            probe.pending(),
            vec![
                "assets/avatar.jpg",
                "assets/grid.svg",
                "assets/hero.webp",
                "css/main.css",
            ]
        );
    }

    #[test]
    fn test_inserted_nodes_are_tracked_once() {
        let (executor, probe, tracker) = tracker();
        let document = FakeDocument::new(ReadyState::Complete);
        tracker.start(document.clone());
        run_until_parked(&executor);
        assert_eq!(tracker.total_resources(), 1);

        document.insert_image("assets/projects/terminal.png");
        document.insert_image("assets/projects/terminal.png");
        document.insert_styled(r#"url("data:image/png;base64,AAAA")"#);
        document.insert_styled(r#"url("assets/avatar.jpg")"#);
        document.insert_styled(r#"url('assets/projects/banner.jpg')"#);
        run_until_parked(&executor);

        assert_eq!(
            tracked_keys(&tracker),
            vec![
                "image:assets/avatar.jpg",
                "image:assets/projects/terminal.png",
                "background-image:assets/projects/banner.jpg",
            ]
        );

        probe.succeed("assets/avatar.jpg");
        probe.succeed("assets/projects/terminal.png");
        probe.fail("assets/projects/banner.jpg");
        run_until_parked(&executor);
        assert_eq!(tracker.progress_ratio(), 1.0);
        assert!(tracker.is_complete());
    }

    #[test]
    fn test_stop_discovery() {
        let (executor, _probe, tracker) = tracker();
        let document = FakeDocument::new(ReadyState::Complete);
        tracker.start(document.clone());
        run_until_parked(&executor);
        assert_eq!(document.observer_count(), 1);

        assert!(tracker.stop_discovery());
        run_until_parked(&executor);
        assert_eq!(document.observer_count(), 0);

        document.insert_image("assets/late.png");
        run_until_parked(&executor);
        assert_eq!(tracker.total_resources(), 1);
        assert!(!tracker.stop_discovery());
    }

    #[test]
    fn test_discovery_waits_for_interactive_document() {
        let (executor, probe, tracker) = tracker();
        let document = FakeDocument::new(ReadyState::Loading);
        document.add_image("assets/hero.webp");

        tracker.start(document.clone());
        run_until_parked(&executor);
        assert_eq!(tracker.total_resources(), 0);
        assert!(probe.started().is_empty());

        document.set_ready_state(ReadyState::Interactive);
        tracker.set_ready_state(ReadyState::Interactive);
        run_until_parked(&executor);
        assert_eq!(tracker.total_resources(), 2);
        assert_eq!(document.observer_count(), 1);
    }

    #[test]
    fn test_detached_subscription_keeps_observing() {
        let (executor, _probe, tracker) = tracker();
        let document = FakeDocument::new(ReadyState::Interactive);

        let subscription = tracker.discover_initial_resources(document.as_ref());
        assert!(subscription.is_active());
        subscription.detach();

        document.insert_image("assets/later.png");
        run_until_parked(&executor);
        assert!(
            tracked_keys(&tracker).contains(&"image:assets/later.png".to_string())
        );

        let subscription = tracker.discover_initial_resources(document.as_ref());
        drop(subscription);
        run_until_parked(&executor);
        assert_eq!(document.observer_count(), 1);
    }
}
