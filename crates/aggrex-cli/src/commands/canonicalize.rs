use aggrex_core::canonicalize;
use serde_json::Value;

use crate::cli::MarketArgs;
use crate::error::CliError;

use super::market_query;

pub fn run(args: &MarketArgs) -> Result<Value, CliError> {
    let query = market_query(args)?;
    Ok(serde_json::to_value(canonicalize(&query))?)
}
