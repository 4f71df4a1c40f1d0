//! CLI argument definitions for aggrex.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `canonicalize` | Derive the canonical identity of a market |
//! | `fetch` | Fetch market data through cache and resilience checks |
//! | `cache` | Inspect, invalidate or sweep the response cache |
//! | `status` | Show per-exchange circuit and rate-limit state |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON config file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `warn` | Tracing filter when `RUST_LOG` is unset |
//! | `--log-format` | `pretty` | Log line format (pretty, json) |
//! | `--mock` | `false` | Offline transport, no network calls |
//!
//! # Examples
//!
//! ```bash
//! aggrex canonicalize --exchange sports --id nfl-game-1 --book dk --home KC --away SF
//! aggrex fetch --exchange kalshi --id INXD-24 --retries 2 --pretty
//! aggrex cache invalidate --exchange bitmex
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Multi-exchange market data aggregator.
#[derive(Debug, Parser)]
#[command(
    name = "aggrex",
    author,
    version,
    about = "Canonical market identity, cached fetches and exchange resilience"
)]
pub struct Cli {
    /// JSON configuration file. `AGGREX_*` environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Answer exchange calls offline instead of over the network.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Derive the canonical UUID, tags and request metadata of a market.
    ///
    /// # Examples
    ///
    ///   aggrex canonicalize --exchange polymarket --id market-a
    ///   aggrex canonicalize --exchange sports --id nfl-game-1 --book dk --home KC --away SF
    Canonicalize(MarketArgs),

    /// Fetch market data, serving from cache when fresh.
    ///
    /// # Examples
    ///
    ///   aggrex fetch --exchange bitmex --id XBTUSD --type perpetual
    ///   aggrex fetch --exchange kalshi --id INXD-24 --force-refresh --retries 1
    Fetch(FetchArgs),

    /// Manage the response cache.
    Cache(CacheArgs),

    /// Show circuit breaker and rate window state per exchange.
    Status(StatusArgs),
}

/// Market reference shared by `canonicalize` and `fetch`.
#[derive(Debug, Clone, Args)]
pub struct MarketArgs {
    /// Exchange: polymarket, kalshi, bitmex or sports.
    #[arg(long)]
    pub exchange: String,

    /// Exchange-native market id.
    #[arg(long = "id")]
    pub native_id: String,

    /// Market type; defaults per exchange.
    #[arg(long = "type")]
    pub market_type: Option<String>,

    /// Sportsbook id (sports only).
    #[arg(long = "book")]
    pub book_id: Option<String>,

    #[arg(long)]
    pub home: Option<String>,

    #[arg(long)]
    pub away: Option<String>,

    #[arg(long)]
    pub period: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub market: MarketArgs,

    /// Skip the cache lookup.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Refetch even when a fresh entry exists.
    #[arg(long, default_value_t = false)]
    pub force_refresh: bool,

    /// Retries after the first attempt; defaults to the exchange policy.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-attempt timeout; defaults to the exchange policy.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Entry counts, hit rate and size per exchange.
    Stats {
        #[arg(long)]
        exchange: Option<String>,
    },

    /// Delete entries. Precedence: --all, --uuid, --exchange, --tag.
    Invalidate(InvalidateArgs),

    /// Delete expired entries now.
    Cleanup,
}

#[derive(Debug, Clone, Args)]
pub struct InvalidateArgs {
    #[arg(long, default_value_t = false)]
    pub all: bool,

    #[arg(long)]
    pub uuid: Option<String>,

    #[arg(long)]
    pub exchange: Option<String>,

    #[arg(long)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[arg(long)]
    pub exchange: Option<String>,
}
