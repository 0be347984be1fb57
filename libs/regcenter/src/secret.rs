use std::fmt;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// ACL token presented to the coordination backend.
///
/// `Debug` and `Display` print `[REDACTED]`; use [`expose`](Self::expose)
/// only when writing the request header. The buffer is zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AclToken(String);

impl AclToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Clone for AclToken {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl fmt::Debug for AclToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for AclToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn formatting_never_leaks_the_token() {
        let token = AclToken::new("b1gs3cr3t");
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        assert_eq!(format!("{token}"), "[REDACTED]");
        assert_eq!(token.expose(), "b1gs3cr3t");
    }

    #[test]
    fn deserializes_from_plain_string() {
        let token: AclToken = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(token.expose(), "abc");
        assert!(!token.is_empty());
    }
}
