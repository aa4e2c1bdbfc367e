//! Proxy harvesting and verification
//!
//! This module provides functionality for:
//! - Fetching pages of the paginated proxy listing
//! - Extracting proxy records and the country directory from listing markup
//! - Harvesting every country page by page into the catalog
//! - Verifying proxies in bounded batches with retries

pub mod checker;
pub mod fetcher;
pub mod harvester;
pub mod models;
pub mod parser;

pub use checker::{CheckerConfig, HttpProbe, Probe, ProxyChecker};
pub use fetcher::{FetcherConfig, ListingFetcher, ListingSource};
pub use harvester::{CountryOutcome, HarvestConfig, HarvestReport, Harvester};
pub use models::{Catalog, CountryDirectory, CountryProxies, ProxyRecord, ProxyType};
pub use parser::{ListingPage, ListingParser};
