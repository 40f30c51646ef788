//! Watch keys.

use std::fmt;
use uuid::Uuid;

/// Process-unique identifier of one watch registration.
///
/// Every call to `expect_weakly_reachable` gets a fresh key, even for an
/// object that is already being watched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey(String);

impl WatchKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a key from an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WatchKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WatchKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_keys_are_unique() {
        let keys: HashSet<WatchKey> = (0..1000).map(|_| WatchKey::generate()).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_generated_key_is_uuid() {
        let key = WatchKey::generate();
        assert!(Uuid::parse_str(key.as_str()).is_ok());
    }

    #[test]
    fn test_display_matches_as_str() {
        let key = WatchKey::from("abc");
        assert_eq!(key.to_string(), "abc");
        assert_eq!(key, WatchKey::new(String::from("abc")));
    }
}
