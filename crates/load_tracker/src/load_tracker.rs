//! Loading-phase tracking for the portfolio page.
//!
//! A [`LoadTracker`] counts images, background images, stylesheets, fonts and
//! in-flight data fetches, and fires its completion callbacks exactly once:
//! when everything has settled and the document is complete, when an empty
//! page has waited out its grace period, or when the absolute timeout hits.

mod config;
mod discovery;
mod document;
mod probe;
mod resource;
mod timers;
mod tracker;

pub use config::*;
pub use discovery::*;
pub use document::*;
pub use probe::*;
pub use resource::*;
pub use timers::*;
pub use tracker::*;
