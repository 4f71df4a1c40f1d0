//! # Domain Models
//!
//! Input and time types shared by the canonicalizer, cache, and orchestrator.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MarketQuery`] | Validated, exchange-specific market reference |
//! | [`MarketQueryBuilder`] | Builder for queries with sports attributes |
//! | [`UtcDateTime`] | UTC timestamp with millisecond conversions |
//!
//! [`duration_ms`] is the serde adapter used by every config struct so that
//! durations round-trip as integer milliseconds.

pub mod duration_ms;
mod market;
mod timestamp;

pub use market::{MarketQuery, MarketQueryBuilder};
pub use timestamp::UtcDateTime;
