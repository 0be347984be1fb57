//! Serde adapter for human-readable `Duration` values.
//!
//! Accepts `humantime` strings (`"10s"`, `"1m 30s"`, `"250ms"`) and bare
//! integers, which are read as whole seconds. Environment providers hand
//! numeric values through as integers, so `APP__REGISTRY__TIMEOUT=5` works
//! the same as `timeout: 5s` in YAML.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Foo {
//!     #[serde(with = "regcenter::humantime_serde")]
//!     timeout: Duration,
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserializer, Serializer, de};

/// Serializes a `Duration` as a humantime string.
///
/// # Errors
/// Returns the serializer's error.
#[allow(clippy::trivially_copy_pass_by_ref)]
pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_str(&humantime::format_duration(*d))
}

/// Deserializes a `Duration` from a humantime string or integer seconds.
///
/// # Errors
/// Returns an error for unparsable strings and negative integers.
pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a duration such as \"10s\" or a number of seconds")
    }

    fn visit_str<E>(self, v: &str) -> Result<Duration, E>
    where
        E: de::Error,
    {
        humantime::parse_duration(v.trim())
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Duration, E>
    where
        E: de::Error,
    {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Duration, E>
    where
        E: de::Error,
    {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Foo {
        #[serde(with = "super")]
        time: Duration,
    }

    #[test]
    fn parses_humantime_strings() {
        let foo: Foo = serde_json::from_str(r#"{"time": "1m 30s"}"#).unwrap();
        assert_eq!(foo.time, Duration::from_secs(90));
        assert_eq!(serde_json::to_string(&foo).unwrap(), r#"{"time":"1m 30s"}"#);
    }

    #[test]
    fn integers_are_seconds() {
        let foo: Foo = serde_json::from_str(r#"{"time": 15}"#).unwrap();
        assert_eq!(foo.time, Duration::from_secs(15));
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<Foo>(r#"{"time": -1}"#).is_err());
        assert!(serde_json::from_str::<Foo>(r#"{"time": "soon"}"#).is_err());
    }
}
