use serde::Serialize;

/// Opaque back reference to the DOM node a resource renders into.
///
/// The tracker only carries these around for probes; it never owns nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ElementId(pub u64);

/// A resource the loading screen waits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Image {
        url: String,
        element: Option<ElementId>,
    },
    BackgroundImage {
        url: String,
        element: Option<ElementId>,
    },
    Stylesheet {
        url: String,
        element: Option<ElementId>,
    },
    /// The page's web fonts, settled by the document's font readiness.
    FontBundle { name: String },
    /// An in-flight data fetch, settled by whoever issued it.
    DataHandle { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Image,
    BackgroundImage,
    Stylesheet,
    FontBundle,
    DataHandle,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::BackgroundImage => "background-image",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::FontBundle => "font-bundle",
            ResourceKind::DataHandle => "data-handle",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration identity: one entry per `(kind, locator)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub url: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.url)
    }
}

impl Resource {
    pub fn image(url: impl Into<String>) -> Self {
        Resource::Image {
            url: url.into(),
            element: None,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Image { .. } => ResourceKind::Image,
            Resource::BackgroundImage { .. } => ResourceKind::BackgroundImage,
            Resource::Stylesheet { .. } => ResourceKind::Stylesheet,
            Resource::FontBundle { .. } => ResourceKind::FontBundle,
            Resource::DataHandle { .. } => ResourceKind::DataHandle,
        }
    }

    /// The source locator; names stand in for kinds without a URL.
    pub fn url(&self) -> &str {
        match self {
            Resource::Image { url, .. }
            | Resource::BackgroundImage { url, .. }
            | Resource::Stylesheet { url, .. } => url,
            Resource::FontBundle { name } | Resource::DataHandle { name } => name,
        }
    }

    pub fn element(&self) -> Option<ElementId> {
        match self {
            Resource::Image { element, .. }
            | Resource::BackgroundImage { element, .. }
            | Resource::Stylesheet { element, .. } => *element,
            Resource::FontBundle { .. } | Resource::DataHandle { .. } => None,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.url())
    }
}

/// Whether `url` carries its payload inline (`data:`), so there is nothing to load.
pub fn is_inline_payload(url: &str) -> bool {
    url.trim_start()
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}
