//! Per-request classification into a cache strategy.

use serde::Serialize;

use crate::config::CacheConfig;
use crate::request::FetchRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestClass {
    StaticAsset,
    HtmlNavigation,
    DataEndpoint,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve a cached copy if any cache has one, otherwise go to the network.
    CacheFirst,
    /// Go to the network, falling back to a cached copy when it is unreachable.
    NetworkFirst,
}

impl RequestClass {
    pub fn strategy(self) -> Strategy {
        match self {
            RequestClass::StaticAsset => Strategy::CacheFirst,
            RequestClass::HtmlNavigation | RequestClass::DataEndpoint | RequestClass::Other => {
                Strategy::NetworkFirst
            }
        }
    }
}

impl std::fmt::Display for RequestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestClass::StaticAsset => write!(f, "static asset"),
            RequestClass::HtmlNavigation => write!(f, "html navigation"),
            RequestClass::DataEndpoint => write!(f, "data endpoint"),
            RequestClass::Other => write!(f, "other"),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::CacheFirst => write!(f, "cache-first"),
            Strategy::NetworkFirst => write!(f, "network-first"),
        }
    }
}

/// How one request will be served, and which store runtime copies go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStrategyDecision {
    pub class: RequestClass,
    pub strategy: Strategy,
    pub cache_name: String,
}

/// Classify `request` by URL shape and `Accept` header.
///
/// Static assets win over everything else, so an image requested with an
/// HTML `Accept` header is still served cache-first.
pub fn classify(request: &FetchRequest, config: &CacheConfig) -> CacheStrategyDecision {
    let path = request.url.path().to_ascii_lowercase();

    let class = if is_static_asset(&path, config) {
        RequestClass::StaticAsset
    } else if request.accepts_html() {
        RequestClass::HtmlNavigation
    } else if is_data_endpoint(&path, config) {
        RequestClass::DataEndpoint
    } else {
        RequestClass::Other
    };

    CacheStrategyDecision {
        class,
        strategy: class.strategy(),
        cache_name: config.dynamic_cache_name(),
    }
}

fn is_static_asset(path: &str, config: &CacheConfig) -> bool {
    config
        .static_roots
        .iter()
        .any(|root| path.contains(root.as_str()))
        || config
            .static_extensions
            .iter()
            .any(|extension| path.ends_with(extension.as_str()))
}

fn is_data_endpoint(path: &str, config: &CacheConfig) -> bool {
    config
        .data_roots
        .iter()
        .any(|root| path.contains(root.as_str()))
        || path.ends_with(".json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, header};
    use url::Url;

    fn decide(request: FetchRequest) -> (RequestClass, Strategy) {
        let decision = classify(&request, &CacheConfig::default());
        assert_eq!(decision.cache_name, "fixeq-dynamic-v1.2.0");
        (decision.class, decision.strategy)
    }

    fn get(url: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_static_assets_are_cache_first() {
        for url in [
            "http://localhost:8080/css/base.css",
            "http://localhost:8080/js/main.js",
            "http://localhost:8080/assets/avatar.jpg",
            "http://localhost:8080/fonts/orbitron.woff2",
            "http://localhost:8080/projects/screenshot.PNG",
            "https://cdn.example.com/icons/logo.svg",
        ] {
            assert_eq!(
                decide(get(url)),
                (RequestClass::StaticAsset, Strategy::CacheFirst),
                "{url}"
            );
        }
    }

    #[test]
    fn test_navigation_and_data_are_network_first() {
        assert_eq!(
            decide(FetchRequest::navigation(Url::parse("http://localhost:8080/").unwrap())),
            (RequestClass::HtmlNavigation, Strategy::NetworkFirst)
        );
        assert_eq!(
            decide(get("http://localhost:8080/data/projects.json")),
            (RequestClass::DataEndpoint, Strategy::NetworkFirst)
        );
        assert_eq!(
            decide(get("http://localhost:8080/api/github/stats")),
            (RequestClass::DataEndpoint, Strategy::NetworkFirst)
        );
        assert_eq!(
            decide(get("http://localhost:8080/manifest.json")),
            (RequestClass::DataEndpoint, Strategy::NetworkFirst)
        );
    }

    #[test]
    fn test_static_asset_wins_over_html_accept() {
        let request = get("http://localhost:8080/assets/avatar.jpg")
            .with_header(header::ACCEPT, HeaderValue::from_static("text/html"));
        assert_eq!(decide(request).0, RequestClass::StaticAsset);
    }

    #[test]
    fn test_everything_else_defaults_to_network_first() {
        assert_eq!(
            decide(get("https://fonts.googleapis.com/css2?family=Orbitron")),
            (RequestClass::Other, Strategy::NetworkFirst)
        );
        assert_eq!(
            decide(get("http://localhost:8080/stats")),
            (RequestClass::Other, Strategy::NetworkFirst)
        );
    }
}
