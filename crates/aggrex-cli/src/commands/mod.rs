mod cache;
mod canonicalize;
mod fetch;
mod status;

use std::sync::Arc;

use aggrex_core::{
    AggregatorConfig, CacheStore, ExchangeId, HttpClient, HttpExchangeClient, MarketFetcher,
    MarketQuery, NoopHttpClient, ReqwestHttpClient, ResilienceManager, ResolvedCacheBackend,
    ValidationError,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cli::{Cli, Command, MarketArgs};
use crate::error::CliError;

/// Composition root: one cache, one resilience manager, one fetcher.
///
/// A durable cache also gets a background expiry sweep, stopped when the
/// runtime is dropped.
pub struct Runtime {
    pub config: AggregatorConfig,
    pub fetcher: MarketFetcher,
    cleanup: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Must be called inside a tokio runtime when the cache is durable.
    pub fn build(config: AggregatorConfig, mock: bool) -> Self {
        let http: Arc<dyn HttpClient> = if mock {
            Arc::new(NoopHttpClient)
        } else {
            Arc::new(ReqwestHttpClient::new())
        };
        let client = HttpExchangeClient::new(http, &config.exchanges);
        let fetcher = MarketFetcher::new(
            CacheStore::from_config(&config),
            Arc::new(ResilienceManager::new(&config.exchanges)),
            Arc::new(client),
            config.exchanges.clone(),
        );

        let durable = matches!(config.resolved_cache_backend(), ResolvedCacheBackend::DuckDb(_));
        let cleanup = (durable && !fetcher.cache().is_degraded())
            .then(|| fetcher.cache().spawn_cleanup(config.cache.cleanup_interval));
        debug!(
            environment = %config.environment,
            mock,
            cleanup_interval_ms = config.cache.cleanup_interval.as_millis() as u64,
            cleanup = cleanup.is_some(),
            "runtime assembled"
        );

        Self {
            config,
            fetcher,
            cleanup,
        }
    }

    pub fn cleanup_running(&self) -> bool {
        self.cleanup
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background sweep. Dropping the runtime does the same.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
            debug!("cache cleanup stopped");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    let config = AggregatorConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Canonicalize(args) => canonicalize::run(args),
        Command::Fetch(args) => {
            let runtime = Runtime::build(config, cli.mock);
            fetch::run(args, &runtime).await
        }
        Command::Cache(args) => {
            let store = CacheStore::from_config(&config);
            cache::run(&args.command, &store).await
        }
        Command::Status(args) => {
            let runtime = Runtime::build(config, cli.mock);
            status::run(args, &runtime).await
        }
    }
}

pub fn market_query(args: &MarketArgs) -> Result<MarketQuery, ValidationError> {
    let exchange = parse_exchange(&args.exchange)?;
    let mut builder = MarketQuery::builder(exchange, args.native_id.as_str());
    if let Some(market_type) = &args.market_type {
        builder = builder.market_type(market_type.parse()?);
    }
    if let Some(book_id) = &args.book_id {
        builder = builder.book_id(book_id.as_str());
    }
    if let Some(home) = &args.home {
        builder = builder.home(home.as_str());
    }
    if let Some(away) = &args.away {
        builder = builder.away(away.as_str());
    }
    if let Some(period) = &args.period {
        builder = builder.period(period.as_str());
    }
    builder.build()
}

pub fn parse_exchange(raw: &str) -> Result<ExchangeId, ValidationError> {
    raw.parse()
}
