//! Credential wrapper that is zeroized on drop and never printed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A secret string (API key, password, token).
///
/// The contents are wiped from memory when the value is dropped, `Debug` and
/// `Display` print `[REDACTED]`, and equality is constant-time.
#[derive(Clone, Default)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(Zeroizing::new(s))
    }

    /// Exposes the secret. Avoid copying the returned value; copies are not zeroized.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecureString {}

impl Serialize for SecureString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecureString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = SecureString::from("hunter2");
        assert_eq!(secret.expose_secret(), "hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn test_secret_equality() {
        assert_eq!(SecureString::from("a"), SecureString::from("a".to_string()));
        assert_ne!(SecureString::from("a"), SecureString::from("b"));
        assert!(SecureString::default().is_empty());
    }

    #[test]
    fn test_secret_deserializes_from_config() {
        let secret: SecureString = serde_json::from_str("\"api-key\"").unwrap();
        assert_eq!(secret.expose_secret(), "api-key");
    }
}
