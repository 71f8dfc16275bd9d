//! Duration strings as used in backend configuration
//!
//! Accepts Go-style duration strings (`"500ms"`, `"10s"`, `"1m30s"`, `"2h"`) or a
//! bare number of seconds. The serde adapters let typed option structs keep a
//! `Duration` field while the configuration file carries a string.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

use crate::error::ConfigError;

/// Parse a duration string such as `"15s"`, `"1m30s"` or `"250ms"`.
///
/// A bare number is interpreted as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidDuration(s.to_string()));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(invalid());
        }
        let (num_str, tail) = rest.split_at(num_end);
        let value: f64 = num_str.parse().map_err(|_| invalid())?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };

        let part = Duration::try_from_secs_f64(value * seconds_per_unit).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
        rest = next;
    }

    Ok(total)
}

/// Render a duration the way Consul expects it in TTL and interval fields.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Seconds(u64),
    Fractional(f64),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, ConfigError> {
        match self {
            RawDuration::Text(s) => parse_duration(&s),
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| ConfigError::InvalidDuration(secs.to_string())),
        }
    }
}

/// Serde adapter: `#[serde(with = "gantry_common::duration")]`
pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

/// Serde adapter for optional durations: `#[serde(with = "gantry_common::duration::option")]`
pub mod option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{RawDuration, format_duration};

    pub fn serialize<S>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "crate::duration")]
        ttl: Duration,
        #[serde(default, with = "crate::duration::option")]
        renew: Option<Duration>,
    }

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(
            parse_duration("1h2m3s").unwrap(),
            Duration::from_secs(3600 + 120 + 3)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("10").is_ok());
        assert!(parse_duration("ten seconds").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_serde_adapters() {
        let holder: Holder = serde_json::from_str(r#"{"ttl": "20s", "renew": "5s"}"#).unwrap();
        assert_eq!(holder.ttl, Duration::from_secs(20));
        assert_eq!(holder.renew, Some(Duration::from_secs(5)));

        let holder: Holder = serde_json::from_str(r#"{"ttl": 3}"#).unwrap();
        assert_eq!(holder.ttl, Duration::from_secs(3));
        assert_eq!(holder.renew, None);

        let err = serde_json::from_str::<Holder>(r#"{"ttl": "soon"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));

        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["ttl"], "3s");
    }
}
