//! Basic proxy credentials generated once per process

use backhaul_core::auth::constant_time_eq;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::HeaderValue;
use std::fmt;
use uuid::Uuid;

/// Realm announced in `Proxy-Authenticate`
pub const REALM: &str = "basic";

#[derive(Clone)]
pub struct ProxyCredentials {
    username: String,
    password: String,
}

impl ProxyCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Fresh random username and password.
    pub fn generate() -> Self {
        Self::new(
            Uuid::new_v4().simple().to_string(),
            Uuid::new_v4().simple().to_string(),
        )
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// `Basic <base64(user:pass)>`
    pub fn header_value(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }

    /// `Proxy-Authenticate` value for a 407 response
    pub fn challenge() -> HeaderValue {
        HeaderValue::from_static("Basic realm=\"basic\"")
    }

    /// Check a `Proxy-Authorization` header value.
    pub fn verify(&self, header: &HeaderValue) -> bool {
        let Ok(value) = header.to_str() else {
            return false;
        };
        let Some((scheme, token)) = value.trim().split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(token.trim()) else {
            return false;
        };
        let Some(split) = decoded.iter().position(|&b| b == b':') else {
            return false;
        };
        let (user, pass) = (&decoded[..split], &decoded[split + 1..]);

        // Both halves are compared so timing does not reveal which one differed
        let user_ok = constant_time_eq(user, self.username.as_bytes());
        let pass_ok = constant_time_eq(pass, self.password.as_bytes());
        user_ok & pass_ok
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_credentials_differ() {
        let a = ProxyCredentials::generate();
        let b = ProxyCredentials::generate();
        assert_eq!(a.username().len(), 32);
        assert_ne!(a.username(), a.password());
        assert_ne!(a.username(), b.username());
    }

    #[test]
    fn test_header_value_round_trips_through_verify() {
        let creds = ProxyCredentials::new("alice", "s3cret:with:colons");
        let header = HeaderValue::from_str(&creds.header_value()).unwrap();
        assert!(creds.verify(&header));
    }

    #[test]
    fn test_known_header_value() {
        // base64("Aladdin:open sesame")
        let creds = ProxyCredentials::new("Aladdin", "open sesame");
        assert_eq!(creds.header_value(), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        let lower = HeaderValue::from_static("basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert!(creds.verify(&lower));
    }

    #[test]
    fn test_rejects_wrong_or_malformed() {
        let creds = ProxyCredentials::new("alice", "pw");
        let other = ProxyCredentials::new("alice", "nope");
        let header = HeaderValue::from_str(&other.header_value()).unwrap();
        assert!(!creds.verify(&header));

        for bad in ["Bearer abc", "Basic", "Basic !!!", "Basic YWxpY2U="] {
            assert!(!creds.verify(&HeaderValue::from_static(bad)), "{bad}");
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = ProxyCredentials::new("alice", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
