//! Upstream call seam used by the fetch orchestrator.
//!
//! Response bodies stay opaque JSON: exchange-specific parsing belongs to the
//! consumers, not to the aggregator.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::http_client::{HttpClient, HttpRequest};
use crate::{CanonicalMarket, ExchangeId, ExchangePolicy};

/// Failure of a single upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("{exchange} has no market at {endpoint}")]
    NotFound {
        exchange: ExchangeId,
        endpoint: String,
    },

    #[error("{exchange} returned HTTP {status}")]
    Status { exchange: ExchangeId, status: u16 },

    #[error("{exchange} call timed out after {timeout_ms} ms")]
    Timeout { exchange: ExchangeId, timeout_ms: u64 },

    #[error("{exchange} transport failure: {message}")]
    Transport { exchange: ExchangeId, message: String },

    #[error("{exchange} returned a malformed body: {message}")]
    MalformedBody { exchange: ExchangeId, message: String },
}

impl ExchangeError {
    /// Whether the outcome counts against the exchange's circuit breaker and
    /// may be retried. A missing market is an answer, not an upstream fault.
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }

    pub const fn exchange(&self) -> ExchangeId {
        match self {
            Self::NotFound { exchange, .. }
            | Self::Status { exchange, .. }
            | Self::Timeout { exchange, .. }
            | Self::Transport { exchange, .. }
            | Self::MalformedBody { exchange, .. } => *exchange,
        }
    }
}

pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ExchangeError>> + Send + 'a>>;

/// Fetches raw market data for a canonical market.
pub trait ExchangeClient: Send + Sync {
    fn fetch_market<'a>(&'a self, market: &'a CanonicalMarket, timeout: Duration) -> ExchangeFuture<'a>;
}

/// [`ExchangeClient`] over HTTP: `base_url + api_metadata.endpoint`, with the
/// canonical headers attached.
pub struct HttpExchangeClient {
    http: Arc<dyn HttpClient>,
    base_urls: BTreeMap<ExchangeId, String>,
}

impl HttpExchangeClient {
    pub fn new(http: Arc<dyn HttpClient>, policies: &BTreeMap<ExchangeId, ExchangePolicy>) -> Self {
        let base_urls = ExchangeId::ALL
            .into_iter()
            .map(|exchange| {
                let base_url = policies
                    .get(&exchange)
                    .map(|policy| policy.base_url.clone())
                    .unwrap_or_else(|| ExchangePolicy::default_for(exchange).base_url);
                (exchange, base_url.trim_end_matches('/').to_owned())
            })
            .collect();

        Self { http, base_urls }
    }

    pub fn url_for(&self, market: &CanonicalMarket) -> String {
        let base_url = self
            .base_urls
            .get(&market.exchange)
            .map(String::as_str)
            .unwrap_or_default();
        format!("{base_url}{}", market.api_metadata.endpoint)
    }
}

impl ExchangeClient for HttpExchangeClient {
    fn fetch_market<'a>(&'a self, market: &'a CanonicalMarket, timeout: Duration) -> ExchangeFuture<'a> {
        Box::pin(async move {
            let exchange = market.exchange;
            let mut request = HttpRequest::get(self.url_for(market))
                .with_header("accept", "application/json")
                .with_timeout(timeout);
            for (name, value) in &market.api_metadata.headers {
                request = request.with_header(name.as_str(), value.as_str());
            }

            let response = self.http.execute(request).await.map_err(|error| {
                if error.is_timeout() {
                    ExchangeError::Timeout {
                        exchange,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    ExchangeError::Transport {
                        exchange,
                        message: error.to_string(),
                    }
                }
            })?;

            if response.status == 404 {
                return Err(ExchangeError::NotFound {
                    exchange,
                    endpoint: market.api_metadata.endpoint.clone(),
                });
            }
            if !response.is_success() {
                return Err(ExchangeError::Status {
                    exchange,
                    status: response.status,
                });
            }

            serde_json::from_str(&response.body).map_err(|error| ExchangeError::MalformedBody {
                exchange,
                message: error.to_string(),
            })
        })
    }
}
