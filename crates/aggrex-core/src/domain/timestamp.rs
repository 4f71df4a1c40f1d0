use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// UTC wall-clock instant. Cache expiry and access order compare these, and
/// the durable backend stores them as unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Out-of-range values clamp to the epoch.
    pub fn from_unix_millis(millis: i64) -> Self {
        let nanos = i128::from(millis) * 1_000_000;
        Self(OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }

    pub fn unix_millis(self) -> i64 {
        i64::try_from(self.0.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self::from_unix_millis(self.unix_millis().saturating_add(millis))
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.unix_millis().to_string())
    }
}

impl FromStr for UtcDateTime {
    type Err = ValidationError;

    /// Accepts RFC3339 with a `Z` or `+00:00` offset only.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let not_utc = || ValidationError::TimestampNotUtc {
            value: input.to_owned(),
        };
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| not_utc())?;
        if parsed.offset() == UtcOffset::UTC {
            Ok(Self(parsed))
        } else {
            Err(not_utc())
        }
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_rfc3339() {
        let parsed: UtcDateTime = "2024-01-01T00:00:00Z".parse().expect("must parse");
        assert_eq!(parsed.to_string(), "2024-01-01T00:00:00Z");
        assert_eq!(parsed.unix_millis(), 1_704_067_200_000);
    }

    #[test]
    fn offsets_other_than_utc_are_rejected() {
        let err = "2024-01-01T01:00:00+01:00"
            .parse::<UtcDateTime>()
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn millisecond_arithmetic_is_exact() {
        let ts = UtcDateTime::from_unix_millis(1_704_067_200_123);
        assert_eq!(ts.unix_millis(), 1_704_067_200_123);
        assert_eq!(
            ts.saturating_add(Duration::from_secs(30)).unix_millis(),
            1_704_067_230_123
        );
        assert!(ts < ts.saturating_add(Duration::from_millis(1)));
    }
}
