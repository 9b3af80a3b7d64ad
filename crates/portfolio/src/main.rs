//! Command-line front end for the portfolio's offline cache gateway.
//!
//! Every command runs the gateway in-process against a mirrored copy of the
//! site on disk, so cache contents do not outlive the command.

mod site;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use offline_cache::{
    CacheConfig, CacheStorage, CacheStrategyDecision, FetchOutcome, FetchRequest, Registration,
    ResponseSource, classify,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::site::SiteDirectory;

#[derive(Parser)]
#[command(name = "portfolio")]
#[command(version, about = "Inspect and exercise the portfolio's offline cache", long_about = None)]
struct Cli {
    /// Cache configuration file (JSON). Missing keys keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show cache store names and the install manifest
    Manifest,

    /// Show how a request would be served
    Classify {
        /// Absolute URL, or a path relative to the configured origin
        url: String,

        /// Send the request as a page navigation (`Accept: text/html`)
        #[arg(long)]
        html: bool,
    },

    /// Install the gateway against a mirrored site and list what was cached
    Install {
        /// Directory holding the mirrored site
        #[arg(long)]
        site: PathBuf,
    },

    /// Install the gateway, then fetch through it
    Fetch {
        /// Directory holding the mirrored site
        #[arg(long)]
        site: PathBuf,

        /// Take the site offline after installing
        #[arg(long)]
        offline: bool,

        /// Absolute URLs, or paths relative to the configured origin
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match smol::block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CacheConfig::load_from(path)?,
        None => CacheConfig::default(),
    };

    match cli.command {
        Command::Manifest => print_report(&manifest(&config)?, cli.json),
        Command::Classify { url, html } => {
            print_report(&classify_url(&config, &url, html)?, cli.json)
        }
        Command::Install { site } => print_report(&install(config, &site).await?, cli.json),
        Command::Fetch {
            site,
            offline,
            urls,
        } => print_report(&fetch(config, &site, &urls, offline).await?, cli.json),
    }
}

trait Report: Serialize {
    fn write_text(&self, out: &mut String);
}

fn print_report(report: &impl Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        let mut out = String::new();
        report.write_text(&mut out);
        print!("{out}");
    }
    Ok(())
}

fn request_for(config: &CacheConfig, url: &str, html: bool) -> Result<FetchRequest> {
    let url = config
        .resolve(url)
        .with_context(|| format!("invalid url {url:?}"))?;
    Ok(if html {
        FetchRequest::navigation(url)
    } else {
        FetchRequest::get(url)
    })
}

#[derive(Debug, PartialEq, Serialize)]
struct ManifestReport {
    static_cache: String,
    dynamic_cache: String,
    urls: Vec<String>,
}

impl Report for ManifestReport {
    fn write_text(&self, out: &mut String) {
        out.push_str(&format!("static cache:  {}\n", self.static_cache));
        out.push_str(&format!("dynamic cache: {}\n", self.dynamic_cache));
        for url in &self.urls {
            out.push_str(&format!("  {url}\n"));
        }
    }
}

fn manifest(config: &CacheConfig) -> Result<ManifestReport> {
    let urls = config
        .manifest_urls()
        .context("invalid entry in the static manifest")?;
    Ok(ManifestReport {
        static_cache: config.static_cache_name(),
        dynamic_cache: config.dynamic_cache_name(),
        urls: urls.into_iter().map(String::from).collect(),
    })
}

#[derive(Debug, PartialEq, Serialize)]
struct ClassifyReport {
    url: String,
    #[serde(flatten)]
    decision: CacheStrategyDecision,
}

impl Report for ClassifyReport {
    fn write_text(&self, out: &mut String) {
        out.push_str(&format!(
            "{}: {}, {} (runtime copies go to {})\n",
            self.url, self.decision.class, self.decision.strategy, self.decision.cache_name
        ));
    }
}

fn classify_url(config: &CacheConfig, url: &str, html: bool) -> Result<ClassifyReport> {
    let request = request_for(config, url, html)?;
    Ok(ClassifyReport {
        url: request.url.to_string(),
        decision: classify(&request, config),
    })
}

#[derive(Debug, PartialEq, Serialize)]
struct InstallReport {
    worker: String,
    caches: Vec<CacheSummary>,
}

#[derive(Debug, PartialEq, Serialize)]
struct CacheSummary {
    name: String,
    entries: Vec<String>,
}

impl Report for InstallReport {
    fn write_text(&self, out: &mut String) {
        out.push_str(&format!("worker {}\n", self.worker));
        for cache in &self.caches {
            out.push_str(&format!("{} ({} entries)\n", cache.name, cache.entries.len()));
            for entry in &cache.entries {
                out.push_str(&format!("  {entry}\n"));
            }
        }
    }
}

fn summarize(storage: &CacheStorage) -> Vec<CacheSummary> {
    storage
        .keys()
        .into_iter()
        .map(|name| CacheSummary {
            entries: storage
                .open(&name)
                .keys()
                .iter()
                .map(ToString::to_string)
                .collect(),
            name,
        })
        .collect()
}

async fn install_gateway(
    config: CacheConfig,
    site: &Path,
) -> Result<(Registration, Arc<SiteDirectory>)> {
    let origin = config
        .resolve("/")
        .context("invalid origin in the cache configuration")?;
    let network = Arc::new(SiteDirectory::new(site, origin));
    let registration = Registration::new(CacheStorage::new(), network.clone());
    let worker = registration
        .install(config)
        .await
        .with_context(|| format!("failed to install the gateway from {}", site.display()))?;
    log::info!("gateway {} is {}", worker.config().version, worker.state());
    Ok((registration, network))
}

async fn install(config: CacheConfig, site: &Path) -> Result<InstallReport> {
    let (registration, _) = install_gateway(config, site).await?;
    let worker = registration
        .active()
        .map(|worker| worker.state().to_string())
        .unwrap_or_else(|| "not active".into());
    Ok(InstallReport {
        worker,
        caches: summarize(registration.storage()),
    })
}

#[derive(Debug, PartialEq, Serialize)]
struct FetchReport {
    offline: bool,
    responses: Vec<FetchedUrl>,
}

#[derive(Debug, PartialEq, Serialize)]
struct FetchedUrl {
    url: String,
    /// `None` when the gateway let the request through untouched.
    source: Option<ResponseSource>,
    status: Option<u16>,
    content_type: Option<String>,
    bytes: usize,
}

impl Report for FetchReport {
    fn write_text(&self, out: &mut String) {
        if self.offline {
            out.push_str("site offline\n");
        }
        for fetched in &self.responses {
            match (fetched.source, fetched.status) {
                (Some(source), Some(status)) => out.push_str(&format!(
                    "{status} {} from {source}, {} bytes{}\n",
                    fetched.url,
                    fetched.bytes,
                    fetched
                        .content_type
                        .as_ref()
                        .map(|content_type| format!(" ({content_type})"))
                        .unwrap_or_default(),
                )),
                _ => out.push_str(&format!("--- {} passed through\n", fetched.url)),
            }
        }
    }
}

async fn fetch(
    config: CacheConfig,
    site: &Path,
    urls: &[String],
    offline: bool,
) -> Result<FetchReport> {
    let requests = urls
        .iter()
        .map(|url| {
            let request = request_for(&config, url, false)?;
            // Directory and .html paths are fetched as page navigations.
            let is_page = request.url.path().ends_with('/') || request.url.path().ends_with(".html");
            Ok(if is_page {
                FetchRequest::navigation(request.url)
            } else {
                request
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (registration, network) = install_gateway(config, site).await?;
    network.set_offline(offline);

    let mut responses = Vec::with_capacity(requests.len());
    for request in &requests {
        let outcome = registration.handle_fetch(request).await;
        responses.push(match outcome {
            FetchOutcome::Passthrough => FetchedUrl {
                url: request.url.to_string(),
                source: None,
                status: None,
                content_type: None,
                bytes: 0,
            },
            FetchOutcome::Respond(served) => FetchedUrl {
                url: request.url.to_string(),
                source: Some(served.source),
                status: Some(served.response.status.as_u16()),
                content_type: served.response.content_type().map(String::from),
                bytes: served.response.body.len(),
            },
        });
    }

    Ok(FetchReport { offline, responses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use offline_cache::{RequestClass, Strategy};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn site_config() -> CacheConfig {
        CacheConfig {
            static_manifest: vec![
                "/".into(),
                "/index.html".into(),
                "/css/base.css".into(),
                "/data/projects.json".into(),
            ],
            ..CacheConfig::default()
        }
    }

    fn mirror() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("index.html"), "<h1>FIXEQ</h1>").unwrap();
        fs::write(dir.path().join("css/base.css"), "body{}").unwrap();
        fs::write(dir.path().join("data/projects.json"), "[]").unwrap();
        dir
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "portfolio",
            "fetch",
            "--site",
            "public",
            "/",
            "/css/base.css",
            "--offline",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Fetch {
                site,
                offline,
                urls,
            } => {
                assert_eq!(site, PathBuf::from("public"));
                assert!(offline);
                assert_eq!(urls, vec!["/", "/css/base.css"]);
            }
            _ => panic!("expected fetch"),
        }

        assert!(Cli::try_parse_from(["portfolio", "fetch", "--site", "public"]).is_err());
    }

    #[test]
    fn test_manifest_report() {
        let report = manifest(&site_config()).unwrap();
        assert_eq!(report.static_cache, "fixeq-static-v1.2.0");
        assert_eq!(report.dynamic_cache, "fixeq-dynamic-v1.2.0");
        assert_eq!(
            report.urls,
            vec![
                "http://localhost:8080/",
                "http://localhost:8080/index.html",
                "http://localhost:8080/css/base.css",
                "http://localhost:8080/data/projects.json",
            ]
        );
    }

    #[test]
    fn test_classify_report() {
        let config = CacheConfig::default();
        let report = classify_url(&config, "/assets/avatar.jpg", true).unwrap();
        assert_eq!(report.decision.class, RequestClass::StaticAsset);
        assert_eq!(report.decision.strategy, Strategy::CacheFirst);

        let report = classify_url(&config, "/about", true).unwrap();
        assert_eq!(report.decision.class, RequestClass::HtmlNavigation);

        let json = serde_json::to_value(classify_url(&config, "/api/stats", false).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "url": "http://localhost:8080/api/stats",
                "class": "data-endpoint",
                "strategy": "network-first",
                "cache_name": "fixeq-dynamic-v1.2.0",
            })
        );
    }

    #[test]
    fn test_install_caches_the_manifest() {
        let dir = mirror();
        let report = smol::block_on(install(site_config(), dir.path())).unwrap();
        assert_eq!(report.worker, "active");
        assert_eq!(report.caches.len(), 1);
        assert_eq!(report.caches[0].name, "fixeq-static-v1.2.0");
        assert_eq!(report.caches[0].entries.len(), 4);
    }

    #[test]
    fn test_install_fails_when_a_manifest_entry_is_missing() {
        let dir = mirror();
        fs::remove_file(dir.path().join("css/base.css")).unwrap();
        let error = smol::block_on(install(site_config(), dir.path())).unwrap_err();
        assert!(format!("{error:#}").contains("failed to install the gateway"));
    }

    #[test]
    fn test_offline_fetch_serves_cached_copies() {
        let dir = mirror();
        let urls = [
            "/css/base.css".to_string(),
            "/about.html".to_string(),
            "/data/projects.json".to_string(),
            "/api/stats".to_string(),
        ];
        let report = smol::block_on(fetch(site_config(), dir.path(), &urls, true)).unwrap();

        let sources: Vec<_> = report
            .responses
            .iter()
            .map(|fetched| (fetched.source, fetched.status))
            .collect();
        assert_eq!(
            sources,
            vec![
                (Some(ResponseSource::Cache), Some(200)),
                (Some(ResponseSource::OfflineShell), Some(200)),
                (Some(ResponseSource::Cache), Some(200)),
                (Some(ResponseSource::OfflineNotice), Some(503)),
            ]
        );
        assert_eq!(
            report.responses[3].content_type.as_deref(),
            Some("application/json")
        );
    }
}
