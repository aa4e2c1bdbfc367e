//! Proxy Harvest - SOCKS5 proxy catalog harvester and verifier
//!
//! Harvests proxies country by country from a paginated listing, keeps the
//! catalog verified on a fixed cadence and serves random picks over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod proxy;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use error::{HarvestError, Result};
pub use proxy::*;
pub use scheduler::{Scheduler, VerifyReport, VerifyScope};
pub use store::CatalogStore;
