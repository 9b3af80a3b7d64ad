//! The slice of the DOM the tracker reads from.

use futures::stream::BoxStream;
use regex::Regex;
use std::sync::LazyLock;

use crate::resource::{ElementId, is_inline_payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Loading,
    Interactive,
    /// The document and its subresources finished loading.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageElement {
    pub element: ElementId,
    pub src: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledElement {
    pub element: ElementId,
    /// Computed `background-image` value, e.g. `url("a.png"), none`.
    pub background_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylesheetLink {
    pub element: ElementId,
    pub href: String,
}

/// A node inserted into the document after the initial sweep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertedNode {
    pub element: Option<ElementId>,
    /// Set when the node is an image element with a source.
    pub image_src: Option<String>,
    /// Computed `background-image` value of an element node.
    pub background_image: Option<String>,
}

pub trait Document: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    fn images(&self) -> Vec<ImageElement>;

    /// Every element whose computed style has a `background-image`.
    fn styled_elements(&self) -> Vec<StyledElement>;

    /// `link rel="stylesheet"` elements.
    fn stylesheet_links(&self) -> Vec<StylesheetLink>;

    /// Nodes inserted anywhere under the body from now on.
    fn observe_insertions(&self) -> BoxStream<'static, InsertedNode>;
}

static BACKGROUND_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("background url pattern is valid")
});

/// Every non-inline URL referenced by a computed `background-image` value.
pub fn background_image_urls(value: &str) -> Vec<String> {
    BACKGROUND_URL
        .captures_iter(value)
        .filter_map(|captures| captures.get(1))
        .map(|url| url.as_str().trim().to_string())
        .filter(|url| !url.is_empty() && !is_inline_payload(url))
        .collect()
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDocument;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use futures::StreamExt as _;
    use futures::channel::mpsc;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// An in-memory document that tests mutate directly.
    pub struct FakeDocument {
        state: Mutex<FakeDocumentState>,
    }

    struct FakeDocumentState {
        ready_state: ReadyState,
        next_element: u64,
        images: Vec<ImageElement>,
        styled: Vec<StyledElement>,
        stylesheets: Vec<StylesheetLink>,
        observers: Vec<mpsc::UnboundedSender<InsertedNode>>,
    }

    impl FakeDocument {
        pub fn new(ready_state: ReadyState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(FakeDocumentState {
                    ready_state,
                    next_element: 1,
                    images: Vec::new(),
                    styled: Vec::new(),
                    stylesheets: Vec::new(),
                    observers: Vec::new(),
                }),
            })
        }

        pub fn set_ready_state(&self, ready_state: ReadyState) {
            self.state.lock().ready_state = ready_state;
        }

        /// Add an image present in the initial markup.
        pub fn add_image(&self, src: &str) -> ElementId {
            let mut state = self.state.lock();
            let element = state.allocate();
            state.images.push(ImageElement {
                element,
                src: src.to_string(),
            });
            element
        }

        pub fn add_styled(&self, background_image: &str) -> ElementId {
            let mut state = self.state.lock();
            let element = state.allocate();
            state.styled.push(StyledElement {
                element,
                background_image: background_image.to_string(),
            });
            element
        }

        pub fn add_stylesheet(&self, href: &str) -> ElementId {
            let mut state = self.state.lock();
            let element = state.allocate();
            state.stylesheets.push(StylesheetLink {
                element,
                href: href.to_string(),
            });
            element
        }

        /// Insert an image after load, notifying observers.
        pub fn insert_image(&self, src: &str) -> ElementId {
            let element = self.add_image(src);
            self.notify(InsertedNode {
                element: Some(element),
                image_src: Some(src.to_string()),
                background_image: None,
            });
            element
        }

        pub fn insert_styled(&self, background_image: &str) -> ElementId {
            let element = self.add_styled(background_image);
            self.notify(InsertedNode {
                element: Some(element),
                image_src: None,
                background_image: Some(background_image.to_string()),
            });
            element
        }

        fn notify(&self, node: InsertedNode) {
            let mut state = self.state.lock();
            state
                .observers
                .retain(|observer| observer.unbounded_send(node.clone()).is_ok());
        }

        /// Observers whose receiving end is still alive.
        pub fn observer_count(&self) -> usize {
            let mut state = self.state.lock();
            state.observers.retain(|observer| !observer.is_closed());
            state.observers.len()
        }
    }

    impl FakeDocumentState {
        fn allocate(&mut self) -> ElementId {
            let element = ElementId(self.next_element);
            self.next_element += 1;
            element
        }
    }

    impl Document for FakeDocument {
        fn ready_state(&self) -> ReadyState {
            self.state.lock().ready_state
        }

        fn images(&self) -> Vec<ImageElement> {
            self.state.lock().images.clone()
        }

        fn styled_elements(&self) -> Vec<StyledElement> {
            self.state.lock().styled.clone()
        }

        fn stylesheet_links(&self) -> Vec<StylesheetLink> {
            self.state.lock().stylesheets.clone()
        }

        fn observe_insertions(&self) -> BoxStream<'static, InsertedNode> {
            let (tx, rx) = mpsc::unbounded();
            self.state.lock().observers.push(tx);
            rx.boxed()
        }
    }
}
