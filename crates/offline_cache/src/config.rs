//! Gateway configuration: cache generations, the install manifest, and the
//! URL rules used to classify requests.
//!
//! Bumping `version` renames both cache stores, which makes the next
//! activation evict every store left over from the previous deployment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix shared by every cache store name.
    pub name_prefix: String,
    /// Deployment version, appended to both store names.
    pub version: String,
    /// Origin that relative manifest entries resolve against.
    pub origin: String,
    /// URLs cached at install time. Relative entries are same-origin.
    pub static_manifest: Vec<String>,
    /// Only URLs whose path ends in one of these are stored at runtime.
    pub cacheable_extensions: Vec<String>,
    /// Path segments that mark a static asset (`/css/`, `/js/`, ...).
    pub static_roots: Vec<String>,
    /// File extensions that mark a static asset.
    pub static_extensions: Vec<String>,
    /// Path segments that mark a data endpoint.
    pub data_roots: Vec<String>,
    /// Shell document served to offline navigations.
    pub root_document: String,
    /// Activate right after a successful install instead of waiting.
    pub skip_waiting: bool,
    /// Periodic sync tag that refreshes `refresh_url`.
    pub sync_tag: String,
    pub refresh_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name_prefix: "fixeq".into(),
            version: "v1.2.0".into(),
            origin: "http://localhost:8080/".into(),
            static_manifest: default_manifest(),
            cacheable_extensions: [".html", ".css", ".js", ".json", ".jpg", ".png", ".svg", ".webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            static_roots: ["/css/", "/js/", "/assets/", "/fonts/"]
                .into_iter()
                .map(String::from)
                .collect(),
            static_extensions: [".jpg", ".png", ".svg", ".webp", ".woff2", ".woff"]
                .into_iter()
                .map(String::from)
                .collect(),
            data_roots: ["/api/", "/data/"].into_iter().map(String::from).collect(),
            root_document: "/index.html".into(),
            skip_waiting: true,
            sync_tag: "portfolio-update".into(),
            refresh_url: "/data/projects.json".into(),
        }
    }
}

fn default_manifest() -> Vec<String> {
    let mut manifest: Vec<String> = vec!["/".into(), "/index.html".into()];
    manifest.extend(
        [
            "reset",
            "variables",
            "base",
            "components",
            "hero",
            "about",
            "skills",
            "projects",
            "footer",
            "construction",
            "animations",
            "responsive",
        ]
        .iter()
        .map(|sheet| format!("/css/{sheet}.css")),
    );
    manifest.extend(
        [
            "utils",
            "main",
            "navigation",
            "animations",
            "components",
            "data-loader",
        ]
        .iter()
        .map(|script| format!("/js/{script}.js")),
    );
    manifest.extend([
        "/data/data.json".into(),
        "/data/projects.json".into(),
        "/assets/avatar.jpg".into(),
        "https://fonts.googleapis.com/css2?family=Orbitron:wght@400;700;900&family=Rajdhani:wght@300;400;500;600;700&display=swap".into(),
        "https://cdnjs.cloudflare.com/ajax/libs/three.js/r128/three.min.js".into(),
    ]);
    manifest
}

impl CacheConfig {
    /// Load config from a JSON file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("cache config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache config from {}", path.display()))?;

        log::info!(
            "cache config loaded from {} (version {})",
            path.display(),
            config.version
        );
        Ok(config)
    }

    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.name_prefix, self.version)
    }

    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.name_prefix, self.version)
    }

    /// Whether `name` belongs to the current generation.
    pub fn is_current_cache(&self, name: &str) -> bool {
        name == self.static_cache_name() || name == self.dynamic_cache_name()
    }

    /// Resolve a manifest entry or configured path against the origin.
    pub fn resolve(&self, path_or_url: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.origin)?.join(path_or_url)
    }

    pub fn manifest_urls(&self) -> Result<Vec<Url>, url::ParseError> {
        self.static_manifest
            .iter()
            .map(|entry| self.resolve(entry))
            .collect()
    }

    /// Whether a successful response for `url` may be stored at runtime.
    pub fn is_cacheable(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        self.cacheable_extensions
            .iter()
            .any(|extension| path.ends_with(extension.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cache_names_follow_version() {
        let mut config = CacheConfig::default();
        assert_eq!(config.static_cache_name(), "fixeq-static-v1.2.0");
        assert_eq!(config.dynamic_cache_name(), "fixeq-dynamic-v1.2.0");

        config.version = "v1.3.0".into();
        assert!(config.is_current_cache("fixeq-dynamic-v1.3.0"));
        assert!(!config.is_current_cache("fixeq-dynamic-v1.2.0"));
        assert!(!config.is_current_cache("fixeq-portfolio-v1.3.0"));
    }

    #[test]
    fn test_manifest_resolves_against_origin() {
        let config = CacheConfig::default();
        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls.len(), config.static_manifest.len());
        assert_eq!(urls[0].as_str(), "http://localhost:8080/");
        assert!(urls.iter().any(|url| url.as_str() == "http://localhost:8080/data/projects.json"));
        assert!(urls.iter().any(|url| url.host_str() == Some("cdnjs.cloudflare.com")));
    }

    #[test]
    fn test_cacheable_checks_path_extension() {
        let config = CacheConfig::default();
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(config.is_cacheable(&url("http://localhost:8080/data/projects.json?t=17")));
        assert!(config.is_cacheable(&url("http://localhost:8080/assets/AVATAR.JPG")));
        assert!(!config.is_cacheable(&url("http://localhost:8080/fonts/orbitron.woff2")));
        assert!(!config.is_cacheable(&url("http://localhost:8080/api/stats")));
    }

    #[test]
    fn test_config_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        assert_eq!(CacheConfig::load_from(&path).unwrap(), CacheConfig::default());

        let mut config = CacheConfig::default();
        config.version = "v2.0.0".into();
        config.static_manifest = vec!["/".into(), "/index.html".into()];
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(CacheConfig::load_from(&path).unwrap(), config);

        std::fs::write(&path, r#"{ "version": "v9" }"#).unwrap();
        let partial = CacheConfig::load_from(&path).unwrap();
        assert_eq!(partial.version, "v9");
        assert_eq!(partial.sync_tag, "portfolio-update");

        std::fs::write(&path, "not json").unwrap();
        assert!(CacheConfig::load_from(&path).is_err());
    }
}
