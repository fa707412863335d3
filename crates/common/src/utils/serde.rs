//! Serialization utilities for common data types
//!
//! Configuration and definition documents express durations as human strings
//! (`"30d"`, `"15m"`). Integer values are accepted as seconds for
//! compatibility with hand-written JSON.

use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

use crate::time::duration::{format_duration, parse_duration};

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("a duration string such as \"15m\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        parse_duration(value).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
        u64::try_from(value)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration must not be negative"))
    }
}

/// Serde helpers for `Duration` as a human-readable string
///
/// # Usage
/// ```rust,ignore
/// use std::time::Duration;
///
/// use dora_common::duration_str;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_str")]
///     timeout: Duration,
/// }
///
/// let parsed: Example = serde_json::from_str(r#"{"timeout":"1m 30s"}"#).unwrap();
/// assert_eq!(parsed.timeout, Duration::from_secs(90));
/// ```
pub mod duration_str {
    use super::{format_duration, Deserializer, Duration, DurationVisitor, Serializer};

    /// Serialize a Duration as a compact human string
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    /// Deserialize a human string (or integer seconds) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Serde helpers for `Option<Duration>` as a human-readable string
pub mod option_duration_str {
    use serde::{Deserialize, Serialize};

    use super::{Deserializer, Duration, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    struct Wrapped(#[serde(with = "super::duration_str")] Duration);

    /// Serialize an optional Duration
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(Wrapped).serialize(serializer)
    }

    /// Deserialize an optional Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        #[serde(with = "super::duration_str")]
        timeout: Duration,
        #[serde(default, with = "super::option_duration_str")]
        grace: Option<Duration>,
    }

    #[test]
    fn deserializes_strings_and_integers() {
        let from_str: Settings = serde_json::from_str(r#"{"timeout":"2m","grace":"10s"}"#).unwrap();
        assert_eq!(from_str.timeout, Duration::from_secs(120));
        assert_eq!(from_str.grace, Some(Duration::from_secs(10)));

        let from_int: Settings = serde_json::from_str(r#"{"timeout":45}"#).unwrap();
        assert_eq!(from_int.timeout, Duration::from_secs(45));
        assert_eq!(from_int.grace, None);
    }

    #[test]
    fn serializes_compact_strings() {
        let settings =
            Settings { timeout: Duration::from_secs(5400), grace: Some(Duration::from_secs(30)) };
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"timeout":"1h30m","grace":"30s"}"#);
    }

    #[test]
    fn works_with_toml() {
        let settings: Settings = toml::from_str("timeout = \"1d\"\n").unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Settings>(r#"{"timeout":"soon"}"#).is_err());
        assert!(serde_json::from_str::<Settings>(r#"{"timeout":-5}"#).is_err());
    }
}
