use async_trait::async_trait;
use http::StatusCode;
use offline_cache::{FetchRequest, FetchResponse, Network, NetworkError};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// Serves a mirrored copy of the site from disk.
///
/// Same-origin paths resolve against the directory root. Other hosts resolve
/// against `<root>/<host>/`, the layout a recursive mirror produces. Query
/// strings are ignored.
pub struct SiteDirectory {
    root: PathBuf,
    origin: Url,
    offline: AtomicBool,
}

impl SiteDirectory {
    pub fn new(root: impl Into<PathBuf>, origin: Url) -> Self {
        Self {
            root: root.into(),
            origin,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.scheme() == self.origin.scheme()
            && url.host_str() == self.origin.host_str()
            && url.port_or_known_default() == self.origin.port_or_known_default()
    }

    /// The file backing `url`, or `None` if the path tries to leave the root.
    fn file_for(&self, url: &Url) -> Option<PathBuf> {
        let mut path = self.root.clone();
        if !self.is_same_origin(url) {
            path.push(url.host_str()?);
        }

        let relative = Path::new(url.path().trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if url.path().ends_with('/') {
            path.push("index.html");
        }
        Some(path)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Network for SiteDirectory {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetworkError> {
        let url = request.url.to_string();
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Offline { url });
        }

        let Some(path) = self.file_for(&request.url) else {
            return Err(NetworkError::Failed {
                url,
                message: "path escapes the site directory".into(),
            });
        };

        match smol::fs::read(&path).await {
            Ok(body) => {
                log::debug!("{url} -> {}", path.display());
                Ok(FetchResponse::ok(body).with_content_type(content_type_for(&path)))
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                log::debug!("{url} -> 404");
                Ok(FetchResponse::new(StatusCode::NOT_FOUND, "Not Found"))
            }
            Err(error) => Err(NetworkError::Failed {
                url,
                message: error.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn origin() -> Url {
        Url::parse("http://localhost:8080/").unwrap()
    }

    fn fetch(site: &SiteDirectory, url: &str) -> Result<FetchResponse, NetworkError> {
        smol::block_on(site.fetch(&FetchRequest::get(Url::parse(url).unwrap())))
    }

    #[test]
    fn test_serves_files_from_the_mirror() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::create_dir_all(dir.path().join("fonts.googleapis.com")).unwrap();
        fs::write(dir.path().join("index.html"), "<h1>FIXEQ</h1>").unwrap();
        fs::write(dir.path().join("css/base.css"), "body{}").unwrap();
        fs::write(dir.path().join("fonts.googleapis.com/css2"), "@font-face{}").unwrap();
        let site = SiteDirectory::new(dir.path(), origin());

        let index = fetch(&site, "http://localhost:8080/").unwrap();
        assert_eq!(index.body.as_ref(), b"<h1>FIXEQ</h1>");
        assert_eq!(index.content_type(), Some("text/html; charset=utf-8"));

        let css = fetch(&site, "http://localhost:8080/css/base.css?v=2").unwrap();
        assert_eq!(css.content_type(), Some("text/css"));

        let font = fetch(&site, "https://fonts.googleapis.com/css2?family=Orbitron").unwrap();
        assert_eq!(font.body.as_ref(), b"@font-face{}");

        let missing = fetch(&site, "http://localhost:8080/js/missing.js").unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_offline_site_refuses_requests() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>FIXEQ</h1>").unwrap();
        let site = SiteDirectory::new(dir.path(), origin());

        site.set_offline(true);
        assert_eq!(
            fetch(&site, "http://localhost:8080/index.html"),
            Err(NetworkError::Offline {
                url: "http://localhost:8080/index.html".into()
            })
        );
    }
}
