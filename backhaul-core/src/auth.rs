//! Shared-secret handling for the control handshake

use backhaul_common::{validate_secret, Result, TunnelError};
use backhaul_protocol::constants::AUTH_SECRET_LEN;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Constant-time comparison of two byte slices
/// Returns true if slices are equal, false otherwise
///
/// This prevents timing attacks where an attacker could determine
/// how many bytes match based on comparison time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// The 36-byte credential a client presents on the control stream
///
/// Always exactly [`AUTH_SECRET_LEN`] printable ASCII bytes. `Debug` never
/// shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSecret([u8; AUTH_SECRET_LEN]);

impl AuthSecret {
    /// Parse a configured secret.
    pub fn new(secret: &str) -> Result<Self> {
        validate_secret(secret)?;
        let mut bytes = [0u8; AUTH_SECRET_LEN];
        bytes.copy_from_slice(secret.as_bytes());
        Ok(Self(bytes))
    }

    /// Generate a fresh secret from the text form of a random UUID.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AUTH_SECRET_LEN];
        // Hyphenated UUID text is exactly 36 ASCII bytes
        Uuid::new_v4().hyphenated().encode_lower(&mut bytes);
        Self(bytes)
    }

    /// Wire form
    pub fn as_bytes(&self) -> &[u8; AUTH_SECRET_LEN] {
        &self.0
    }

    /// Text form, for printing a generated secret to the operator
    pub fn expose(&self) -> &str {
        // Construction guarantees ASCII
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Compare a received value against this secret in constant time.
    #[must_use]
    pub fn matches(&self, presented: &[u8]) -> bool {
        constant_time_eq(&self.0, presented)
    }
}

impl std::fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthSecret(<redacted>)")
    }
}

impl std::str::FromStr for AuthSecret {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "d12a1f29-065d-4d65-addf-fefa51ff019b";

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_secret_parsing() {
        let secret = AuthSecret::new(SECRET).unwrap();
        assert_eq!(secret.as_bytes().len(), 36);
        assert_eq!(secret.expose(), SECRET);
        assert!(AuthSecret::new("too-short").is_err());
        assert!("x".repeat(36).parse::<AuthSecret>().is_ok());
    }

    #[test]
    fn test_matches_requires_exact_value() {
        let secret = AuthSecret::new(SECRET).unwrap();
        assert!(secret.matches(SECRET.as_bytes()));

        let mut other = SECRET.as_bytes().to_vec();
        other[35] = b'c';
        assert!(!secret.matches(&other));
        assert!(!secret.matches(&SECRET.as_bytes()[..35]));
    }

    #[test]
    fn test_generated_secrets_are_valid_and_distinct() {
        let a = AuthSecret::generate();
        let b = AuthSecret::generate();
        assert_ne!(a, b);
        assert!(AuthSecret::new(a.expose()).is_ok());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = AuthSecret::new(SECRET).unwrap();
        assert!(!format!("{secret:?}").contains("d12a"));
    }
}
