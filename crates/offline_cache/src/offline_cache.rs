//! Offline cache gateway for the portfolio site.
//!
//! Runs in the worker context and intercepts every GET the page issues:
//! - Install pre-populates a static cache from a fixed manifest (all or nothing)
//! - Activate deletes cache stores from earlier deployments
//! - Fetch picks cache-first for static assets and network-first for
//!   navigations, data endpoints and everything else
//! - When neither network nor cache can answer, navigations get the cached
//!   shell document and other requests get a JSON 503

mod cache_storage;
mod config;
mod network;
mod registration;
mod request;
mod service_worker;
mod strategy;

pub use cache_storage::*;
pub use config::*;
pub use network::*;
pub use registration::*;
pub use request::*;
pub use service_worker::*;
pub use strategy::*;
