//! Proxy checker module for verifying proxy liveness
//!
//! Records are probed in fixed-size batches: every probe of a batch runs
//! concurrently and the next batch starts only once the whole batch is done.

use crate::error::{HarvestError, Result};
use crate::proxy::models::ProxyRecord;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of probes in flight per batch
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Default number of attempts per record
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts in seconds
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;

/// Default URL to test proxies against
pub const DEFAULT_TEST_URL: &str = "https://www.baidu.com";

/// A single reachability probe through a proxy
#[async_trait]
pub trait Probe: Send + Sync {
    /// Succeeds if any HTTP response came back from `target` through the proxy
    async fn probe(&self, record: &ProxyRecord, target: &str) -> Result<()>;
}

/// Probes by issuing a GET through the proxy with reqwest
#[derive(Debug, Clone)]
pub struct HttpProbe {
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, record: &ProxyRecord) -> Result<Client> {
        let proxy_url = record
            .url()
            .ok_or_else(|| HarvestError::InvalidProxyAddress(record.address.clone()))?;

        let client = Client::builder()
            .proxy(ReqwestProxy::all(&proxy_url)?)
            .timeout(self.timeout)
            // The probe only proves transport through the proxy
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(client)
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, record: &ProxyRecord, target: &str) -> Result<()> {
        let client = self.create_client(record)?;

        match tokio::time::timeout(self.timeout, client.get(target).send()).await {
            Ok(Ok(response)) => {
                debug!(proxy = %record, status = response.status().as_u16(), "Probe answered");
                Ok(())
            }
            Ok(Err(e)) => Err(HarvestError::Probe(e.to_string())),
            Err(_) => Err(HarvestError::Probe(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Number of probes run together
    pub batch_size: usize,
    /// Attempts per record before declaring it dead
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// URL to test proxies against
    pub test_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }
}

/// Proxy checker for validating proxies
pub struct ProxyChecker<P = HttpProbe> {
    config: CheckerConfig,
    probe: P,
}

impl ProxyChecker<HttpProbe> {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        let probe = HttpProbe::new(config.timeout);
        Self { config, probe }
    }
}

impl Default for ProxyChecker<HttpProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Probe> ProxyChecker<P> {
    /// Create a checker around a custom probe
    pub fn with_probe(config: CheckerConfig, probe: P) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check a single proxy, retrying failed attempts.
    ///
    /// The first answered attempt wins; only after the last attempt fails is the
    /// proxy reported dead.
    pub async fn check_proxy(&self, record: &ProxyRecord, target: &str) -> bool {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.probe.probe(record, target).await {
                Ok(()) => return true,
                Err(e) => {
                    debug!(proxy = %record, attempt, error = %e, "Probe attempt failed");
                    if attempt == attempts {
                        break;
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        false
    }

    /// Verify records against `target`, one flag per record in input order
    pub async fn verify(&self, records: &[ProxyRecord], target: &str) -> Vec<bool> {
        let batch_size = self.config.batch_size.max(1);
        let mut results = Vec::with_capacity(records.len());

        for (index, batch) in records.chunks(batch_size).enumerate() {
            let checks = batch.iter().map(|record| self.check_proxy(record, target));
            let batch_results = join_all(checks).await;

            debug!(
                batch = index + 1,
                alive = batch_results.iter().filter(|&&ok| ok).count(),
                size = batch.len(),
                "Batch verified"
            );
            results.extend(batch_results);
        }

        results
    }

    /// Verify against the configured test URL
    pub async fn verify_default(&self, records: &[ProxyRecord]) -> Vec<bool> {
        self.verify(records, &self.config.test_url).await
    }

    /// Verify records and separate them into alive and dead, each in input order
    pub async fn check_and_separate(
        &self,
        records: Vec<ProxyRecord>,
    ) -> (Vec<ProxyRecord>, Vec<ProxyRecord>) {
        let results = self.verify_default(&records).await;

        let (alive, dead): (Vec<_>, Vec<_>) = records
            .into_iter()
            .zip(results)
            .partition(|(_, ok)| *ok);

        info!(alive = alive.len(), dead = dead.len(), "Verification finished");
        (
            alive.into_iter().map(|(r, _)| r).collect(),
            dead.into_iter().map(|(r, _)| r).collect(),
        )
    }
}
