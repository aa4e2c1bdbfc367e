//! Harvester driving per-country pagination of the proxy listing
//!
//! A harvest walks an explicit, precomputed sequence of country codes: the
//! priority countries first, then every country of the directory captured on the
//! first fetched page, in directory order. Each country is paged through one page
//! at a time and the catalog is written to disk after every page.

use crate::error::Result;
use crate::proxy::fetcher::ListingSource;
use crate::proxy::models::Catalog;
use crate::proxy::parser::ListingParser;
use crate::store::CatalogStore;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Default priority country harvested before all others
pub const DEFAULT_PRIORITY_COUNTRY: &str = "CN";

/// Default courtesy pause before every page after the first
const DEFAULT_PAGE_DELAY_SECS: u64 = 2;

/// Configuration for a harvest run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Countries harvested first, in order
    pub priority: Vec<String>,
    /// Pause before fetching any page beyond the first of a country
    pub page_delay: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            priority: vec![DEFAULT_PRIORITY_COUNTRY.to_string()],
            page_delay: Duration::from_secs(DEFAULT_PAGE_DELAY_SECS),
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Vec<String>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }
}

/// How a single country's pagination ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryOutcome {
    /// Every announced page was fetched
    Completed { pages: u32, records: usize },
    /// A fetch failed; the remaining pages were skipped
    Aborted { pages: u32, records: usize },
    /// The country ended with no records and was removed
    Pruned,
}

/// Summary of a full harvest run
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    /// Countries in the order they were harvested
    pub visited: Vec<String>,
    /// Countries removed for having no records
    pub pruned: Vec<String>,
    /// Countries whose pagination was cut short by a fetch failure
    pub aborted: Vec<String>,
    /// Priority countries left out because the directory does not list them
    pub skipped: Vec<String>,
}

/// Drives a harvest against a listing source, persisting through a catalog store
pub struct Harvester<S> {
    source: S,
    store: CatalogStore,
    config: HarvestConfig,
}

impl<S: ListingSource> Harvester<S> {
    pub fn new(source: S, store: CatalogStore, config: HarvestConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Harvest everything into a fresh catalog stamped with the current time.
    ///
    /// Fetch failures only cut a country short. Storage failures abort the run.
    pub async fn run(&self) -> Result<(Catalog, HarvestReport)> {
        let mut catalog = Catalog::fresh(Utc::now());
        let mut report = HarvestReport::default();
        let mut directory_captured = false;

        let priority = dedup_codes(&self.config.priority);
        for code in &priority {
            if directory_captured && !catalog.directory.contains_code(code) {
                info!(country = %code, "Priority country not in directory, skipping");
                report.skipped.push(code.clone());
                continue;
            }
            let capture = !directory_captured;
            let outcome = self
                .harvest_country(&mut catalog, code, capture)
                .await?;
            if capture && !catalog.directory.is_empty() {
                directory_captured = true;
            }
            report.record(code, outcome);
        }

        // Snapshot taken once; later pruning does not change the walk
        let remaining: Vec<String> = catalog
            .directory
            .codes()
            .into_iter()
            .filter(|code| !priority.contains(code))
            .collect();
        info!(countries = remaining.len(), "Harvesting remaining countries");

        for code in &remaining {
            let outcome = self.harvest_country(&mut catalog, code, false).await?;
            report.record(code, outcome);
        }

        // Priority countries visited before the directory existed may be out of step with it
        let swept = catalog.prune_empty_countries();
        let unlisted = catalog.drop_unlisted();
        if !swept.is_empty() || !unlisted.is_empty() {
            self.store.save(&catalog)?;
            report.pruned.extend(swept);
            report.pruned.extend(unlisted);
        }

        info!(
            countries = catalog.directory.len(),
            records = catalog.total_records(),
            pruned = report.pruned.len(),
            aborted = report.aborted.len(),
            "Completed processing all countries"
        );
        Ok((catalog, report))
    }

    /// Page through one country, appending and persisting page by page.
    ///
    /// With `capture_directory`, the country directory is taken from page 1.
    #[instrument(skip(self, catalog))]
    pub async fn harvest_country(
        &self,
        catalog: &mut Catalog,
        code: &str,
        capture_directory: bool,
    ) -> Result<CountryOutcome> {
        info!("Processing country");
        let mut page = 1;
        let mut total_pages = 1;
        let mut fetched = 0;
        let mut records = 0;
        let mut aborted = false;

        loop {
            if page > 1 {
                tokio::time::sleep(self.config.page_delay).await;
            }

            let body = match self.source.fetch_page(code, page).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(page, error = %e, "Fetch failed, skipping rest of country");
                    aborted = true;
                    break;
                }
            };
            fetched += 1;

            let listing = ListingParser::parse(&body);
            if page == 1 {
                if capture_directory {
                    catalog.directory = listing.countries;
                    info!(countries = catalog.directory.len(), "Captured country directory");
                }
                total_pages = listing.total_pages;
                info!(total_pages, "Found total pages");
            }

            let added = catalog.append(code, listing.proxies);
            records += added;
            self.store.save(catalog)?;
            info!(page, added, "Saved page");

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        if catalog.prune_if_empty(code) {
            self.store.save(catalog)?;
            info!("Removed empty country");
            return Ok(CountryOutcome::Pruned);
        }

        Ok(if aborted {
            CountryOutcome::Aborted {
                pages: fetched,
                records,
            }
        } else {
            CountryOutcome::Completed {
                pages: fetched,
                records,
            }
        })
    }
}

impl HarvestReport {
    fn record(&mut self, code: &str, outcome: CountryOutcome) {
        self.visited.push(code.to_string());
        match outcome {
            CountryOutcome::Pruned => self.pruned.push(code.to_string()),
            CountryOutcome::Aborted { .. } => self.aborted.push(code.to_string()),
            CountryOutcome::Completed { .. } => {}
        }
    }
}

fn dedup_codes(codes: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(codes.len());
    for code in codes {
        let code = code.trim().to_uppercase();
        if !code.is_empty() && !seen.contains(&code) {
            seen.push(code);
        }
    }
    seen
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::HarvestError;
    use crate::proxy::checker::tests::assert_about;
    use crate::proxy::parser::tests::{listing_html, proxy_row};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::Instant;

    /// A fetch as seen by the fake source, with the number of records on disk at that moment
    #[derive(Debug, Clone)]
    pub(crate) struct Call {
        pub country: String,
        pub page: u32,
        pub at: Instant,
        pub persisted: usize,
    }

    /// Listing served from memory; pages mapped to `None` fail to fetch
    #[derive(Default)]
    pub(crate) struct FakeListing {
        pages: HashMap<(String, u32), Option<String>>,
        calls: Mutex<Vec<Call>>,
        pub store: Option<CatalogStore>,
    }

    impl FakeListing {
        pub(crate) fn page(mut self, country: &str, page: u32, html: String) -> Self {
            self.pages.insert((country.to_string(), page), Some(html));
            self
        }

        pub(crate) fn failing(mut self, country: &str, page: u32) -> Self {
            self.pages.insert((country.to_string(), page), None);
            self
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn visited(&self) -> Vec<(String, u32)> {
            self.calls().into_iter().map(|c| (c.country, c.page)).collect()
        }
    }

    #[async_trait]
    impl ListingSource for FakeListing {
        async fn fetch_page(&self, country: &str, page: u32) -> Result<String> {
            let persisted = self
                .store
                .as_ref()
                .and_then(|s| s.load().ok())
                .map_or(0, |c| c.total_records());
            self.calls.lock().unwrap().push(Call {
                country: country.to_string(),
                page,
                at: Instant::now(),
                persisted,
            });

            match self.pages.get(&(country.to_string(), page)) {
                Some(Some(html)) => Ok(html.clone()),
                _ => Err(HarvestError::Fetch {
                    url: format!("fake://{country}/{page}"),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }

    pub(crate) fn paginator(country: &str, pages: u32) -> Vec<String> {
        let base = format!("/en/proxylist/country/{country}/socks5/uptime/all");
        let mut links: Vec<String> = (2..=pages).map(|p| format!("{base}/{p}")).collect();
        if pages > 1 {
            links.push(format!("{base}/next"));
        }
        links
    }

    pub(crate) fn page_html(rows: &[(&str, &str)], options: &[(&str, &str)], links: &[String]) -> String {
        let rows: Vec<String> = rows.iter().map(|(ip, port)| proxy_row(ip, port)).collect();
        let links: Vec<&str> = links.iter().map(String::as_str).collect();
        listing_html(&rows, options, &links)
    }

    fn harvester(source: FakeListing, dir: &TempDir) -> Harvester<FakeListing> {
        let store = CatalogStore::new(dir.path().join("list.json"));
        let source = FakeListing {
            store: Some(store.clone()),
            ..source
        };
        Harvester::new(source, store, HarvestConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_page_country() {
        let dir = TempDir::new().unwrap();
        let options = [("all", "All"), ("CN", "China (6)")];
        let links = paginator("CN", 3);
        let source = FakeListing::default()
            .page("CN", 1, page_html(&[("1.0.0.1", "1080"), ("1.0.0.2", "1080")], &options, &links))
            .page("CN", 2, page_html(&[("1.0.0.3", "1080"), ("1.0.0.4", "1080")], &options, &links))
            .page("CN", 3, page_html(&[("1.0.0.5", "1080"), ("1.0.0.6", "1080")], &options, &links));
        let harvester = harvester(source, &dir);

        let (catalog, report) = harvester.run().await.unwrap();

        let calls = harvester.source.calls();
        assert_eq!(harvester.source.visited(), vec![
            ("CN".to_string(), 1),
            ("CN".to_string(), 2),
            ("CN".to_string(), 3),
        ]);
        assert_about(calls[1].at - calls[0].at, Duration::from_secs(2));
        assert_about(calls[2].at - calls[1].at, Duration::from_secs(2));

        // Each page was on disk before the next fetch
        let persisted: Vec<usize> = calls.iter().map(|c| c.persisted).collect();
        assert_eq!(persisted, vec![0, 2, 4]);
        assert_eq!(harvester.store().load().unwrap(), catalog);

        assert_eq!(catalog.records("CN").len(), 6);
        assert_eq!(report.visited, vec!["CN"]);
        assert!(catalog.timestamp.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_page_has_no_delay() {
        let dir = TempDir::new().unwrap();
        let options = [("CN", "China (1)"), ("US", "United States (1)")];
        let source = FakeListing::default()
            .page("CN", 1, page_html(&[("1.0.0.1", "1080")], &options, &[]))
            .page("US", 1, page_html(&[("2.0.0.1", "1080")], &options, &[]));
        let harvester = harvester(source, &dir);
        let start = Instant::now();

        harvester.run().await.unwrap();

        let calls = harvester.source.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].at, start);
        assert_eq!(calls[1].at, start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_priority_then_directory() {
        let dir = TempDir::new().unwrap();
        let options = [
            ("all", "All countries"),
            ("US", "United States (1)"),
            ("CN", "China (1)"),
            ("DE", "Germany (1)"),
        ];
        let source = FakeListing::default()
            .page("CN", 1, page_html(&[("1.0.0.1", "1080")], &options, &[]))
            .page("US", 1, page_html(&[("2.0.0.1", "1080")], &[], &[]))
            .page("DE", 1, page_html(&[("3.0.0.1", "1080")], &[], &[]));
        let harvester = harvester(source, &dir);

        let (catalog, report) = harvester.run().await.unwrap();

        assert_eq!(report.visited, vec!["CN", "US", "DE"]);
        assert_eq!(catalog.directory.codes(), vec!["US", "CN", "DE"]);
        // Directory is taken from the priority country only
        assert_eq!(catalog.directory.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_failed_countries_are_pruned() {
        let dir = TempDir::new().unwrap();
        let options = [
            ("CN", "China (1)"),
            ("US", "United States (0)"),
            ("DE", "Germany (3)"),
        ];
        let source = FakeListing::default()
            .page("CN", 1, page_html(&[("1.0.0.1", "1080")], &options, &[]))
            .page("US", 1, page_html(&[], &[], &paginator("US", 2)))
            .page("US", 2, page_html(&[], &[], &[]))
            .failing("DE", 1);
        let harvester = harvester(source, &dir);

        let (catalog, report) = harvester.run().await.unwrap();

        assert_eq!(report.pruned, vec!["US", "DE"]);
        assert_eq!(catalog.country_codes(), vec!["CN"]);
        assert_eq!(catalog.directory.codes(), vec!["CN"]);

        let on_disk = harvester.store().load().unwrap();
        assert_eq!(on_disk.country_codes(), vec!["CN"]);
        assert_eq!(on_disk.directory.codes(), vec!["CN"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_abandons_remaining_pages() {
        let dir = TempDir::new().unwrap();
        let options = [("CN", "China (3)")];
        let links = paginator("CN", 3);
        let source = FakeListing::default()
            .page("CN", 1, page_html(&[("1.0.0.1", "1080")], &options, &links))
            .failing("CN", 2)
            .page("CN", 3, page_html(&[("1.0.0.3", "1080")], &options, &links));
        let harvester = harvester(source, &dir);

        let (catalog, report) = harvester.run().await.unwrap();

        assert_eq!(
            harvester.source.visited(),
            vec![("CN".to_string(), 1), ("CN".to_string(), 2)]
        );
        assert_eq!(report.aborted, vec!["CN"]);
        assert_eq!(catalog.records("CN").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_falls_through_to_next_priority() {
        let dir = TempDir::new().unwrap();
        let options = [("CN", "China (1)"), ("US", "United States (1)"), ("DE", "Germany (1)")];
        let source = FakeListing::default()
            .failing("CN", 1)
            .page("US", 1, page_html(&[("2.0.0.1", "1080")], &options, &[]))
            .page("DE", 1, page_html(&[("3.0.0.1", "1080")], &[], &[]));
        let store = CatalogStore::new(dir.path().join("list.json"));
        let harvester = Harvester::new(
            source,
            store,
            HarvestConfig::new().with_priority(vec!["cn".to_string(), "US".to_string(), "CN".to_string()]),
        );

        let (catalog, report) = harvester.run().await.unwrap();

        assert_eq!(report.visited, vec!["CN", "US", "DE"]);
        assert_eq!(catalog.country_codes(), vec!["DE", "US"]);
        assert!(!catalog.directory.contains_code("CN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlisted_priority_country_is_skipped() {
        let dir = TempDir::new().unwrap();
        let source = FakeListing::default()
            .page("CN", 1, page_html(&[("1.0.0.1", "1080")], &[("CN", "China (1)")], &[]))
            .page("JP", 1, page_html(&[("4.0.0.1", "1080")], &[], &[]));
        let store = CatalogStore::new(dir.path().join("list.json"));
        let harvester = Harvester::new(
            source,
            store,
            HarvestConfig::new().with_priority(vec!["CN".to_string(), "JP".to_string()]),
        );

        let (catalog, report) = harvester.run().await.unwrap();

        assert_eq!(harvester.source.visited(), vec![("CN".to_string(), 1)]);
        assert_eq!(report.skipped, vec!["JP"]);
        assert_eq!(catalog.country_codes(), vec!["CN"]);
        assert_eq!(catalog.directory.codes(), vec!["CN"]);

        let on_disk = harvester.store().load().unwrap();
        assert_eq!(on_disk.country_codes(), on_disk.directory.codes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_harvested_before_directory_is_dropped_when_unlisted() {
        let dir = TempDir::new().unwrap();
        // JP answers without a country filter, so US supplies the directory afterwards
        let source = FakeListing::default()
            .page("JP", 1, page_html(&[("4.0.0.1", "1080")], &[], &[]))
            .page("US", 1, page_html(&[("2.0.0.1", "1080")], &[("US", "United States (1)")], &[]));
        let store = CatalogStore::new(dir.path().join("list.json"));
        let harvester = Harvester::new(
            source,
            store,
            HarvestConfig::new().with_priority(vec!["JP".to_string(), "US".to_string()]),
        );

        let (catalog, report) = harvester.run().await.unwrap();

        assert_eq!(report.pruned, vec!["JP"]);
        assert_eq!(catalog.country_codes(), vec!["US"]);
        assert_eq!(harvester.store().load().unwrap().country_codes(), vec!["US"]);
    }

    #[test]
    fn test_dedup_codes() {
        let codes = vec![" cn".to_string(), "US".to_string(), "CN".to_string(), "".to_string()];
        assert_eq!(dedup_codes(&codes), vec!["CN", "US"]);
    }
}
