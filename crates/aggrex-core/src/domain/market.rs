use serde::Serialize;

use crate::{ExchangeId, MarketType, ValidationError};

const MAX_NATIVE_ID_LEN: usize = 256;

/// Exchange-specific market reference, validated at construction.
///
/// A query is immutable once built; canonicalization never has to handle an
/// empty `native_id` or a sports market without its book and teams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MarketQuery {
    exchange: ExchangeId,
    native_id: String,
    market_type: MarketType,
    #[serde(skip_serializing_if = "Option::is_none")]
    book_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    home: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    away: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    period: Option<String>,
}

impl MarketQuery {
    pub fn new(
        exchange: ExchangeId,
        native_id: impl Into<String>,
        market_type: MarketType,
    ) -> Result<Self, ValidationError> {
        Self::builder(exchange, native_id)
            .market_type(market_type)
            .build()
    }

    /// Sports market keyed by book and the ordered home/away pair.
    pub fn sports(
        native_id: impl Into<String>,
        book_id: impl Into<String>,
        home: impl Into<String>,
        away: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::builder(ExchangeId::Sports, native_id)
            .book_id(book_id)
            .home(home)
            .away(away)
            .build()
    }

    pub fn builder(exchange: ExchangeId, native_id: impl Into<String>) -> MarketQueryBuilder {
        MarketQueryBuilder {
            exchange,
            native_id: native_id.into(),
            market_type: None,
            book_id: None,
            home: None,
            away: None,
            period: None,
        }
    }

    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    pub fn native_id(&self) -> &str {
        &self.native_id
    }

    pub fn market_type(&self) -> MarketType {
        self.market_type
    }

    pub fn book_id(&self) -> Option<&str> {
        self.book_id.as_deref()
    }

    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    pub fn away(&self) -> Option<&str> {
        self.away.as_deref()
    }

    pub fn period(&self) -> Option<&str> {
        self.period.as_deref()
    }
}

/// Builder for [`MarketQuery`]. Validation happens in [`MarketQueryBuilder::build`].
#[derive(Debug, Clone)]
pub struct MarketQueryBuilder {
    exchange: ExchangeId,
    native_id: String,
    market_type: Option<MarketType>,
    book_id: Option<String>,
    home: Option<String>,
    away: Option<String>,
    period: Option<String>,
}

impl MarketQueryBuilder {
    pub fn market_type(mut self, market_type: MarketType) -> Self {
        self.market_type = Some(market_type);
        self
    }

    pub fn book_id(mut self, book_id: impl Into<String>) -> Self {
        self.book_id = Some(book_id.into());
        self
    }

    pub fn home(mut self, home: impl Into<String>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn away(mut self, away: impl Into<String>) -> Self {
        self.away = Some(away.into());
        self
    }

    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn build(self) -> Result<MarketQuery, ValidationError> {
        let native_id = self.native_id.trim().to_owned();
        if native_id.is_empty() {
            return Err(ValidationError::EmptyNativeId);
        }
        let len = native_id.chars().count();
        if len > MAX_NATIVE_ID_LEN {
            return Err(ValidationError::NativeIdTooLong {
                len,
                max: MAX_NATIVE_ID_LEN,
            });
        }

        let book_id = normalize_attribute("book_id", self.book_id)?;
        let home = normalize_attribute("home", self.home)?;
        let away = normalize_attribute("away", self.away)?;
        let period = normalize_attribute("period", self.period)?;

        if self.exchange == ExchangeId::Sports {
            if book_id.is_none() {
                return Err(ValidationError::MissingSportsAttribute { field: "book_id" });
            }
            if home.is_none() {
                return Err(ValidationError::MissingSportsAttribute { field: "home" });
            }
            if away.is_none() {
                return Err(ValidationError::MissingSportsAttribute { field: "away" });
            }
        }

        Ok(MarketQuery {
            exchange: self.exchange,
            native_id,
            market_type: self
                .market_type
                .unwrap_or_else(|| self.exchange.default_market_type()),
            book_id,
            home,
            away,
            period,
        })
    }
}

fn normalize_attribute(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<String>, ValidationError> {
    match value {
        None => Ok(None),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(ValidationError::EmptyAttribute { field });
            }
            Ok(Some(trimmed.to_owned()))
        }
    }
}
