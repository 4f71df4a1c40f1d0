use serde_json::{json, Value};

use crate::cli::StatusArgs;
use crate::error::CliError;

use super::{parse_exchange, Runtime};

/// Resilience state plus cache stats. State is process-local, so a fresh
/// CLI process reports clean circuits; the output mainly shows effective policy.
pub async fn run(args: &StatusArgs, runtime: &Runtime) -> Result<Value, CliError> {
    let resilience = runtime.fetcher.resilience();
    let exchanges = match args.exchange.as_deref() {
        Some(raw) => vec![resilience.snapshot(parse_exchange(raw)?)],
        None => resilience.snapshots(),
    };

    let mut entries = Vec::with_capacity(exchanges.len());
    for status in exchanges {
        let policy = runtime.config.policy(status.exchange);
        entries.push(json!({
            "status": status,
            "policy": policy,
        }));
    }

    let cache = runtime.fetcher.cache().stats(None).await;
    Ok(json!({
        "environment": runtime.config.environment,
        "exchanges": entries,
        "cache": cache,
    }))
}
