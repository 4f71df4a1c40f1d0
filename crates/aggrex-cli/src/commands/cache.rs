use aggrex_core::{CacheStore, InvalidateRequest, ValidationError};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cli::{CacheCommand, InvalidateArgs};
use crate::error::CliError;

use super::parse_exchange;

pub async fn run(command: &CacheCommand, store: &CacheStore) -> Result<Value, CliError> {
    match command {
        CacheCommand::Stats { exchange } => {
            let exchange = exchange.as_deref().map(parse_exchange).transpose()?;
            Ok(serde_json::to_value(store.stats(exchange).await)?)
        }
        CacheCommand::Invalidate(args) => {
            let request = invalidate_request(args)?;
            let removed = store.invalidate(&request).await;
            Ok(json!({ "removed": removed, "filter": request }))
        }
        CacheCommand::Cleanup => {
            let removed = store.cleanup().await;
            Ok(json!({ "removed": removed }))
        }
    }
}

fn invalidate_request(args: &InvalidateArgs) -> Result<InvalidateRequest, ValidationError> {
    let uuid = args
        .uuid
        .as_deref()
        .map(|raw| {
            Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidUuid {
                value: raw.to_owned(),
            })
        })
        .transpose()?;

    Ok(InvalidateRequest {
        all: args.all,
        uuid,
        exchange: args.exchange.as_deref().map(parse_exchange).transpose()?,
        tag: args.tag.clone(),
    })
}
