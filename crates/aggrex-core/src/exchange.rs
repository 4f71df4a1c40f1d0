use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream exchanges the aggregator can canonicalize and fetch from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Polymarket,
    Kalshi,
    Bitmex,
    Sports,
}

impl ExchangeId {
    pub const ALL: [Self; 4] = [Self::Polymarket, Self::Kalshi, Self::Bitmex, Self::Sports];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polymarket => "polymarket",
            Self::Kalshi => "kalshi",
            Self::Bitmex => "bitmex",
            Self::Sports => "sports",
        }
    }

    /// Market type assumed when a query does not name one.
    pub const fn default_market_type(self) -> MarketType {
        match self {
            Self::Polymarket | Self::Kalshi => MarketType::Binary,
            Self::Bitmex => MarketType::Perpetual,
            Self::Sports => MarketType::Moneyline,
        }
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "polymarket" => Ok(Self::Polymarket),
            "kalshi" => Ok(Self::Kalshi),
            "bitmex" => Ok(Self::Bitmex),
            "sports" => Ok(Self::Sports),
            other => Err(ValidationError::InvalidExchange {
                value: other.to_owned(),
            }),
        }
    }
}

/// Instrument shape of a market; part of its canonical identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Binary,
    Categorical,
    Scalar,
    Perpetual,
    Future,
    Moneyline,
    Spread,
    Total,
}

impl MarketType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Categorical => "categorical",
            Self::Scalar => "scalar",
            Self::Perpetual => "perpetual",
            Self::Future => "future",
            Self::Moneyline => "moneyline",
            Self::Spread => "spread",
            Self::Total => "total",
        }
    }
}

impl Display for MarketType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "categorical" => Ok(Self::Categorical),
            "scalar" => Ok(Self::Scalar),
            "perpetual" => Ok(Self::Perpetual),
            "future" => Ok(Self::Future),
            "moneyline" => Ok(Self::Moneyline),
            "spread" => Ok(Self::Spread),
            "total" => Ok(Self::Total),
            other => Err(ValidationError::InvalidMarketType {
                value: other.to_owned(),
            }),
        }
    }
}
