//! CivicPulse Core Library
//!
//! Ingests Canadian civic data (representatives, bills, committees,
//! events, votes) from a fleet of per-jurisdiction scrapers and exposes
//! the normalized result through a queryable SQLite store and an HTTP
//! control plane.
//!
//! Lint configuration lives in Cargo.toml's `[lints]` tables.

pub mod core;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::context::CoreContext;
pub use crate::core::control::ControlPlane;
pub use crate::core::db::Store;
pub use crate::core::executor::ExecutorPool;
pub use crate::core::phases::PhasedLoader;
pub use crate::core::registry::ScraperRegistry;
pub use crate::core::scheduler::Scheduler;
pub use crate::core::scrapers::{RawRecord, Scraper};
