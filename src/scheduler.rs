//! Lifecycle scheduler deciding between re-harvesting and re-verifying
//!
//! At startup the catalog is harvested if missing or stale. Afterwards, on every
//! tick, the snapshot is re-read, harvested again once stale, and then verified.

use crate::error::{HarvestError, Result};
use crate::proxy::checker::{Probe, ProxyChecker};
use crate::proxy::fetcher::ListingSource;
use crate::proxy::harvester::Harvester;
use crate::proxy::models::Catalog;
use crate::store::CatalogStore;
use anyhow::Context;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

/// Which countries a verification pass covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VerifyScope {
    #[default]
    All,
    Country(String),
}

impl VerifyScope {
    /// Empty setting means all countries
    pub fn from_setting(country: Option<&str>) -> Self {
        match country.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => VerifyScope::Country(code.to_uppercase()),
            None => VerifyScope::All,
        }
    }
}

/// Outcome of one verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub alive: usize,
    /// Countries removed because nothing in them answered
    pub pruned: Vec<String>,
}

/// Drives harvests and verification passes against one snapshot
pub struct Scheduler<S, P> {
    harvester: Harvester<S>,
    checker: ProxyChecker<P>,
    scope: VerifyScope,
    target: String,
    interval: Duration,
}

impl<S: ListingSource, P: Probe> Scheduler<S, P> {
    pub fn new(
        harvester: Harvester<S>,
        checker: ProxyChecker<P>,
        scope: VerifyScope,
        target: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            harvester,
            checker,
            scope,
            target: target.into(),
            interval,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        self.harvester.store()
    }

    /// Make sure a fresh catalog exists before anything is served.
    ///
    /// A missing snapshot triggers a first harvest; any other read failure is fatal.
    pub async fn bootstrap(&self) -> anyhow::Result<Catalog> {
        match self.store().load() {
            Ok(catalog) if self.store().is_stale(&catalog) => {
                info!("Snapshot is older than 24 hours, updating");
                Ok(self.refresh(&catalog).await?)
            }
            Ok(catalog) => {
                info!(
                    countries = catalog.proxies.len(),
                    records = catalog.total_records(),
                    "Loaded snapshot"
                );
                Ok(catalog)
            }
            Err(HarvestError::NotFound(path)) => {
                info!(path = %path.display(), "No snapshot yet, harvesting");
                let (catalog, _) = self.harvester.run().await?;
                Ok(catalog)
            }
            Err(e) => Err(e).context("Failed to load snapshot at startup"),
        }
    }

    /// Back up the current snapshot, then harvest a new one
    pub async fn refresh(&self, current: &Catalog) -> Result<Catalog> {
        match self.store().backup(current.timestamp) {
            Ok(_) | Err(HarvestError::NoExistingSnapshot(_)) => {}
            Err(e) => return Err(e),
        }
        let (catalog, _) = self.harvester.run().await?;
        Ok(catalog)
    }

    /// One scheduled pass: reload, harvest if stale, then verify
    #[instrument(skip(self))]
    pub async fn tick(&self) -> anyhow::Result<VerifyReport> {
        info!("Starting proxy check");

        let mut catalog = match self.store().load() {
            Ok(catalog) => catalog,
            Err(HarvestError::NotFound(_)) => {
                warn!("Snapshot disappeared, harvesting again");
                Catalog::default()
            }
            Err(e) => return Err(e).context("Failed to reload snapshot"),
        };

        if self.store().is_stale(&catalog) {
            info!("Data is older than 24 hours, updating");
            catalog = self.refresh(&catalog).await.context("Harvest failed")?;
        }

        let report = self
            .verify_catalog(&mut catalog)
            .await
            .context("Verification failed")?;
        Ok(report)
    }

    /// Verify the configured countries, pruning dead entries and saving after each country
    pub async fn verify_catalog(&self, catalog: &mut Catalog) -> Result<VerifyReport> {
        let codes = match &self.scope {
            VerifyScope::All => {
                info!("Checking proxies for all countries");
                catalog.country_codes()
            }
            VerifyScope::Country(code) => {
                if catalog.records(code).is_empty() {
                    info!(country = %code, "No proxies found for country");
                    return Ok(VerifyReport::default());
                }
                vec![code.clone()]
            }
        };

        let mut report = VerifyReport::default();
        for code in codes {
            let records = catalog.records(&code).to_vec();
            if records.is_empty() {
                continue;
            }

            info!(country = %code, count = records.len(), "Checking proxies");
            let results = self.checker.verify(&records, &self.target).await;
            let kept = catalog.retain_alive(&code, &results);

            report.checked += records.len();
            report.alive += kept;
            if kept == 0 {
                info!(country = %code, "Removed empty country");
                report.pruned.push(code.clone());
            } else {
                info!(country = %code, valid = kept, total = records.len(), "Valid proxies");
            }

            self.store().save(catalog)?;
        }

        info!(
            remaining = catalog.proxies.len(),
            alive = report.alive,
            checked = report.checked,
            "Completed checking"
        );
        Ok(report)
    }

    /// Tick forever on the configured cadence until `shutdown` flips to true.
    ///
    /// A failed tick is logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting proxy checks every {}s", self.interval.as_secs());

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Shutdown also interrupts a check in progress
                    tokio::select! {
                        result = self.tick() => {
                            if let Err(e) = result {
                                error!("Error during proxy check: {:#}", e);
                            }
                        }
                        _ = shutdown_requested(&mut shutdown) => {
                            info!("Scheduler shutting down during a check");
                            break;
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }
}

/// Resolves once the flag is set or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
