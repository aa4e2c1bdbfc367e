use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_harvest::{
    api::ApiServer,
    config::{Config, LogFormat},
    proxy::{
        CheckerConfig, FetcherConfig, HarvestConfig, Harvester, HttpProbe, ListingFetcher,
        ProxyChecker,
    },
    scheduler::{Scheduler, VerifyScope},
    store::CatalogStore,
    HarvestError,
};
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Harvests SOCKS5 proxies, keeps them verified and serves random picks
#[derive(Parser)]
#[command(name = "proxy-harvest")]
#[command(about = "Harvests SOCKS5 proxies, keeps them verified and serves random picks")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Snapshot file path (overrides DATA_FILE)
    #[arg(short, long, global = true)]
    data_file: Option<PathBuf>,

    /// Query server port (overrides PORT)
    #[arg(short, long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest when needed, serve queries and verify on a fixed cadence
    Serve,
    /// Back up the snapshot and run one full harvest
    Harvest,
    /// Run one verification pass over the snapshot
    Verify {
        /// Only verify this country code
        #[arg(short, long)]
        country: Option<String>,
    },
    /// Print snapshot freshness and per-country counts
    Status,
}

type AppScheduler = Scheduler<ListingFetcher, HttpProbe>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(data_file) = cli.data_file {
        config.data_file = data_file;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,
        Commands::Harvest => {
            let scheduler = build_scheduler(&config, VerifyScope::All)?;
            let current = scheduler.store().load().unwrap_or_default();
            let catalog = scheduler.refresh(&current).await?;
            println!(
                "Harvested {} proxies across {} countries into {:?}",
                catalog.total_records(),
                catalog.proxies.len(),
                config.data_file
            );
        }
        Commands::Verify { country } => {
            let scope = VerifyScope::from_setting(
                country.as_deref().or(config.check_country.as_deref()),
            );
            let scheduler = build_scheduler(&config, scope)?;
            let mut catalog = scheduler.store().load()?;
            let report = scheduler.verify_catalog(&mut catalog).await?;
            println!(
                "Results: {} alive, {} dead",
                report.alive,
                report.checked - report.alive
            );
            if !report.pruned.is_empty() {
                println!("Removed countries: {}", report.pruned.join(", "));
            }
        }
        Commands::Status => status(&CatalogStore::new(&config.data_file))?,
    }

    Ok(())
}

/// Full lifecycle: bootstrap, then the query server and the verification loop
async fn serve(config: Config) -> Result<()> {
    info!("Starting proxy harvest service");

    let scope = VerifyScope::from_setting(config.check_country.as_deref());
    let scheduler = build_scheduler(&config, scope)?;

    // Nothing is served before a usable catalog exists
    let catalog = scheduler.bootstrap().await?;
    info!(
        countries = catalog.proxies.len(),
        records = catalog.total_records(),
        "Catalog ready"
    );

    let (shutdown_tx, _) = watch::channel(false);

    let api_server = ApiServer::new(
        config.host.clone(),
        config.port,
        CatalogStore::new(&config.data_file),
    );
    // A query layer that cannot start is fatal
    let listener = api_server.bind().await?;

    let api_shutdown = shutdown_tx.subscribe();
    let mut api_task =
        tokio::spawn(async move { api_server.serve(listener, api_shutdown).await });

    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let api_result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
        result = &mut api_task => Some(result),
    };

    let _ = shutdown_tx.send(true);
    let api_result = match api_result {
        Some(result) => result,
        None => api_task.await,
    };
    let _ = scheduler_task.await;

    match api_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("API server error: {:#}", e);
            return Err(e);
        }
        Err(e) => return Err(e).context("API server task panicked"),
    }

    info!("Proxy harvest service stopped");
    Ok(())
}

fn build_scheduler(config: &Config, scope: VerifyScope) -> Result<AppScheduler> {
    let store = CatalogStore::new(&config.data_file);

    let fetcher = ListingFetcher::with_config(
        FetcherConfig::new().with_base_url(config.listing_base_url.clone()),
    )?;
    let harvester = Harvester::new(
        fetcher,
        store,
        HarvestConfig::new().with_priority(config.priority_countries.clone()),
    );

    let checker = ProxyChecker::with_config(
        CheckerConfig::new()
            .with_batch_size(config.batch_size)
            .with_test_url(config.check_target.clone()),
    );

    Ok(Scheduler::new(
        harvester,
        checker,
        scope,
        config.check_target.clone(),
        config.check_interval,
    ))
}

fn status(store: &CatalogStore) -> Result<()> {
    let catalog = match store.load() {
        Ok(catalog) => catalog,
        Err(HarvestError::NotFound(path)) => {
            println!("No snapshot at {:?}", path);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match catalog.harvested_at() {
        Some(at) => println!(
            "Harvested at {} ({})",
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            if store.is_stale(&catalog) { "stale" } else { "fresh" }
        ),
        None => println!("No harvest timestamp (stale)"),
    }
    println!(
        "{} proxies across {} countries",
        catalog.total_records(),
        catalog.proxies.len()
    );
    for code in catalog.country_codes() {
        println!("  {}: {}", code, catalog.records(&code).len());
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "proxy_harvest=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
