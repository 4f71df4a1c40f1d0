//! Deterministic canonical identity for exchange markets.
//!
//! A [`CanonicalMarket`] is a pure function of its [`MarketQuery`]: the UUID is
//! a version-5 (SHA-1 name-based) UUID of an ordered identity name, derived
//! against a fixed namespace per exchange so identical native ids on two
//! exchanges never collide.
//!
//! The identity name encodes each component as `key:len:value;` in a fixed
//! order (`native_id`, `type`, `home`, `away`, `book`, `period`). Length
//! prefixes keep the encoding unambiguous, and the fixed order makes
//! `home`/`away` swaps produce a different market.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::Serialize;
use uuid::Uuid;

use crate::{ExchangeId, MarketQuery, MarketType, UtcDateTime};

/// Schema version of the identity derivation. Bumping it requires new namespaces.
pub const CANONICALIZER_VERSION: &str = "1.0.0";

const POLYMARKET_NAMESPACE_V1: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_4c7a_8e15_0d2f_3b6a_9c41);
const KALSHI_NAMESPACE_V1: Uuid = Uuid::from_u128(0x2d8e_57b1_c6a0_4f93_b2e7_4a1c_85d0_3e6f);
const BITMEX_NAMESPACE_V1: Uuid = Uuid::from_u128(0x91a3_0c5d_7e28_4b6f_a4d9_6c3e_1f08_b725);
const SPORTS_NAMESPACE_V1: Uuid = Uuid::from_u128(0xc47f_1e92_3a6b_4d08_9f51_e2b7_0a4c_6d13);
const SALT_NAMESPACE_V1: Uuid = Uuid::from_u128(0x5be0_d3a7_48c1_4e26_b09f_7d5a_2c81_f46e);

const SALT_LEN: usize = 16;

/// Namespace UUID used to derive canonical ids for `exchange`.
pub const fn exchange_namespace(exchange: ExchangeId) -> Uuid {
    match exchange {
        ExchangeId::Polymarket => POLYMARKET_NAMESPACE_V1,
        ExchangeId::Kalshi => KALSHI_NAMESPACE_V1,
        ExchangeId::Bitmex => BITMEX_NAMESPACE_V1,
        ExchangeId::Sports => SPORTS_NAMESPACE_V1,
    }
}

/// Request metadata derived from a canonical market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiMetadata {
    /// Canonical fetch path, relative to the exchange base URL.
    pub endpoint: String,
    /// `exchange:endpoint:uuid`.
    pub cache_key: String,
    pub headers: BTreeMap<String, String>,
}

/// Canonicalization output. Cheap to recompute; only `uuid` is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalMarket {
    pub uuid: Uuid,
    pub exchange: ExchangeId,
    pub native_id: String,
    #[serde(rename = "type")]
    pub market_type: MarketType,
    pub tags: BTreeSet<String>,
    pub version: &'static str,
    pub canonicalized_at: UtcDateTime,
    pub salt: String,
    pub api_metadata: ApiMetadata,
}

/// Derive the canonical identity and request metadata for `query`.
pub fn canonicalize(query: &MarketQuery) -> CanonicalMarket {
    let name = identity_name(query);
    let uuid = Uuid::new_v5(&exchange_namespace(query.exchange()), name.as_bytes());
    let salt = salt_for(&name);
    let endpoint = endpoint_for(query);
    let cache_key = format!("{}:{}:{}", query.exchange(), endpoint, uuid);

    let mut headers = BTreeMap::new();
    headers.insert(String::from("X-Canonical-UUID"), uuid.to_string());
    headers.insert(
        String::from("X-Canonical-Exchange"),
        query.exchange().as_str().to_owned(),
    );
    headers.insert(
        String::from("X-Canonical-Type"),
        query.market_type().as_str().to_owned(),
    );
    headers.insert(String::from("X-Canonical-Salt"), salt.clone());
    headers.insert(
        String::from("X-Canonical-Version"),
        CANONICALIZER_VERSION.to_owned(),
    );

    CanonicalMarket {
        uuid,
        exchange: query.exchange(),
        native_id: query.native_id().to_owned(),
        market_type: query.market_type(),
        tags: tags_for(query),
        version: CANONICALIZER_VERSION,
        canonicalized_at: UtcDateTime::now(),
        salt,
        api_metadata: ApiMetadata {
            endpoint,
            cache_key,
            headers,
        },
    }
}

fn identity_name(query: &MarketQuery) -> String {
    let mut name = String::new();
    push_component(&mut name, "native_id", Some(query.native_id()));
    push_component(&mut name, "type", Some(query.market_type().as_str()));
    push_component(&mut name, "home", query.home());
    push_component(&mut name, "away", query.away());
    push_component(&mut name, "book", query.book_id());
    push_component(&mut name, "period", query.period());
    name
}

fn push_component(name: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        let _ = write!(name, "{key}:{}:{value};", value.len());
    }
}

fn salt_for(name: &str) -> String {
    let digest = Uuid::new_v5(&SALT_NAMESPACE_V1, name.as_bytes());
    let mut salt = digest.simple().to_string();
    salt.truncate(SALT_LEN);
    salt
}

fn tags_for(query: &MarketQuery) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    tags.insert(query.exchange().as_str().to_owned());
    tags.insert(query.market_type().as_str().to_owned());
    if let Some(book) = query.book_id() {
        tags.insert(format!("book:{}", book.to_ascii_lowercase()));
    }
    if let Some(period) = query.period() {
        tags.insert(format!("period:{}", period.to_ascii_lowercase()));
    }
    tags
}

/// Canonical fetch path for the query's exchange and market type.
pub fn endpoint_for(query: &MarketQuery) -> String {
    let id = urlencoding::encode(query.native_id());
    match (query.exchange(), query.market_type()) {
        (ExchangeId::Polymarket, MarketType::Categorical) => format!("/events/{id}"),
        (ExchangeId::Polymarket, _) => format!("/markets/{id}"),
        (ExchangeId::Kalshi, MarketType::Categorical) => format!("/trade-api/v2/events/{id}"),
        (ExchangeId::Kalshi, _) => format!("/trade-api/v2/markets/{id}"),
        (ExchangeId::Bitmex, MarketType::Perpetual | MarketType::Future) => {
            format!("/api/v1/instrument?symbol={id}")
        }
        (ExchangeId::Bitmex, _) => format!("/api/v1/orderBook/L2?symbol={id}"),
        (ExchangeId::Sports, market_type) => {
            let book = urlencoding::encode(query.book_id().unwrap_or_default());
            let mut path = format!("/v1/books/{book}/events/{id}/markets/{market_type}");
            if let Some(period) = query.period() {
                let _ = write!(path, "?period={}", urlencoding::encode(period));
            }
            path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_canonical_format(value: &str) -> bool {
        let bytes = value.as_bytes();
        if bytes.len() != 36 {
            return false;
        }
        for (index, byte) in bytes.iter().enumerate() {
            let ok = match index {
                8 | 13 | 18 | 23 => *byte == b'-',
                14 => *byte == b'5',
                19 => matches!(byte, b'8' | b'9' | b'a' | b'b'),
                _ => byte.is_ascii_digit() || (b'a'..=b'f').contains(byte),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    #[test]
    fn identical_queries_yield_identical_identity() {
        let query = MarketQuery::new(ExchangeId::Polymarket, "market-a", MarketType::Binary)
            .expect("valid");
        let first = canonicalize(&query);
        for _ in 0..100 {
            let again = canonicalize(&query);
            assert_eq!(again.uuid, first.uuid);
            assert_eq!(again.salt, first.salt);
            assert_eq!(again.api_metadata, first.api_metadata);
        }
    }

    #[test]
    fn distinct_native_ids_and_types_separate() {
        let a = MarketQuery::new(ExchangeId::Polymarket, "market-a", MarketType::Binary)
            .expect("valid");
        let b = MarketQuery::new(ExchangeId::Polymarket, "market-b", MarketType::Binary)
            .expect("valid");
        let a_scalar = MarketQuery::new(ExchangeId::Polymarket, "market-a", MarketType::Scalar)
            .expect("valid");

        assert_ne!(canonicalize(&a).uuid, canonicalize(&b).uuid);
        assert_ne!(canonicalize(&a).uuid, canonicalize(&a_scalar).uuid);
    }

    #[test]
    fn exchanges_never_share_identity() {
        let poly = MarketQuery::new(ExchangeId::Polymarket, "market-a", MarketType::Binary)
            .expect("valid");
        let kalshi =
            MarketQuery::new(ExchangeId::Kalshi, "market-a", MarketType::Binary).expect("valid");
        assert_ne!(canonicalize(&poly).uuid, canonicalize(&kalshi).uuid);
    }

    #[test]
    fn home_away_order_changes_identity() {
        let kc_home = MarketQuery::sports("nfl-game-1", "dk", "KC", "SF").expect("valid");
        let sf_home = MarketQuery::sports("nfl-game-1", "dk", "SF", "KC").expect("valid");

        let kc = canonicalize(&kc_home);
        let sf = canonicalize(&sf_home);
        assert_ne!(kc.uuid, sf.uuid);
        assert_ne!(kc.salt, sf.salt);
    }

    #[test]
    fn period_and_book_are_part_of_identity() {
        let base = MarketQuery::sports("nfl-game-1", "dk", "KC", "SF").expect("valid");
        let other_book = MarketQuery::sports("nfl-game-1", "fd", "KC", "SF").expect("valid");
        let first_half = MarketQuery::builder(ExchangeId::Sports, "nfl-game-1")
            .book_id("dk")
            .home("KC")
            .away("SF")
            .period("1h")
            .build()
            .expect("valid");

        let base = canonicalize(&base).uuid;
        assert_ne!(base, canonicalize(&other_book).uuid);
        assert_ne!(base, canonicalize(&first_half).uuid);
    }

    #[test]
    fn uuids_use_version_five_layout() {
        let queries = [
            MarketQuery::new(ExchangeId::Polymarket, "0x1234", MarketType::Binary),
            MarketQuery::new(ExchangeId::Kalshi, "PRES-2028", MarketType::Categorical),
            MarketQuery::new(ExchangeId::Bitmex, "XBTUSD", MarketType::Perpetual),
            MarketQuery::sports("nba-7", "pinnacle", "LAL", "BOS"),
        ];
        for query in queries {
            let canonical = canonicalize(&query.expect("valid"));
            assert_eq!(canonical.uuid.get_version_num(), 5);
            assert!(is_canonical_format(&canonical.uuid.to_string()));
        }
    }

    #[test]
    fn metadata_carries_endpoint_cache_key_and_tags() {
        let query =
            MarketQuery::new(ExchangeId::Bitmex, "XBTUSD", MarketType::Perpetual).expect("valid");
        let canonical = canonicalize(&query);

        assert_eq!(canonical.api_metadata.endpoint, "/api/v1/instrument?symbol=XBTUSD");
        assert_eq!(
            canonical.api_metadata.cache_key,
            format!("bitmex:/api/v1/instrument?symbol=XBTUSD:{}", canonical.uuid)
        );
        assert!(canonical.tags.contains("bitmex"));
        assert!(canonical.tags.contains("perpetual"));
        assert_eq!(canonical.salt.len(), 16);
        assert_eq!(
            canonical.api_metadata.headers.get("X-Canonical-UUID"),
            Some(&canonical.uuid.to_string())
        );
    }

    #[test]
    fn sports_endpoint_encodes_book_and_period() {
        let query = MarketQuery::builder(ExchangeId::Sports, "nfl game/1")
            .book_id("dk")
            .home("KC")
            .away("SF")
            .period("1st half")
            .build()
            .expect("valid");
        let canonical = canonicalize(&query);
        assert_eq!(
            canonical.api_metadata.endpoint,
            "/v1/books/dk/events/nfl%20game%2F1/markets/moneyline?period=1st%20half"
        );
        assert!(canonical.tags.contains("book:dk"));
        assert!(canonical.tags.contains("period:1st half"));
    }
}
