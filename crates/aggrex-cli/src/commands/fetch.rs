use std::time::Duration;

use aggrex_core::{CancelSignal, FetchOptions};
use serde_json::{json, Value};
use tracing::info;

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::{market_query, Runtime};

pub async fn run(args: &FetchArgs, runtime: &Runtime) -> Result<Value, CliError> {
    let query = market_query(&args.market)?;

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling fetch");
            on_interrupt.cancel();
        }
    });

    let options = FetchOptions {
        use_cache: !args.no_cache,
        force_refresh: args.force_refresh,
        timeout: args.timeout_ms.map(Duration::from_millis),
        retries: args.retries,
        request_id: None,
        cancel: Some(cancel),
    };
    let outcome = runtime.fetcher.fetch(&query, &options).await;
    interrupt.abort();
    let result = outcome?;

    Ok(json!({
        "data": result.data,
        "canonical": result.canonical,
        "cached": result.cached,
        "latency_ms": u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX),
        "attempts": result.attempts,
        "headers": result.headers.to_header_map(),
    }))
}
