//! JSON configuration files for the server and client roles
//!
//! Keys are PascalCase (`BindAddress`, `ControlPort`, ...). Port fields accept
//! either a JSON number or a numeric string.

use crate::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_CONTROL_PORT, DEFAULT_DOMAIN_NAME};
use crate::error::{Result, TunnelError};
use backhaul_protocol::constants::AUTH_SECRET_LEN;
use backhaul_protocol::control::validate_domain;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Server role configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    /// Interface for the control listener and every gateway listener
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port clients dial
    #[serde(default = "default_control_port", deserialize_with = "port")]
    pub control_port: u16,
    /// Domain announced in the control message
    #[serde(default = "default_domain_name")]
    pub domain_name: String,
    /// Shared 36-byte credential
    #[serde(default)]
    pub secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            domain_name: default_domain_name(),
            secret: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load(path.as_ref())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TunnelError::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(TunnelError::Config("BindAddress must not be empty".into()));
        }
        validate_domain(&self.domain_name)?;
        validate_secret(&self.secret)
    }
}

/// Client role configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientConfig {
    /// `host:controlPort` of the tunnel server
    pub reverse_tunnel_addr: String,
    /// `host:port` of the private service
    pub local_service_addr: String,
    /// Shared 36-byte credential
    #[serde(default)]
    pub secret: String,
    /// Optional port for the local HTTP forward proxy
    #[serde(default, deserialize_with = "optional_port")]
    pub proxy_port: Option<u16>,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load(path.as_ref())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TunnelError::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.reverse_tunnel_addr.trim().is_empty() {
            return Err(TunnelError::Config(
                "ReverseTunnelAddr must not be empty".into(),
            ));
        }
        if self.local_service_addr.trim().is_empty() {
            return Err(TunnelError::Config(
                "LocalServiceAddr must not be empty".into(),
            ));
        }
        validate_secret(&self.secret)
    }
}

/// Check that a secret has the exact wire length and is printable ASCII.
pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.len() != AUTH_SECRET_LEN {
        return Err(TunnelError::Config(format!(
            "Secret must be exactly {AUTH_SECRET_LEN} bytes, got {}",
            secret.len()
        )));
    }
    if !secret.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(TunnelError::Config(
            "Secret must contain only printable ASCII characters".into(),
        ));
    }
    Ok(())
}

fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        TunnelError::Config(format!("Failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| TunnelError::Config(format!("Failed to parse {}: {e}", path.display())))
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_domain_name() -> String {
    DEFAULT_DOMAIN_NAME.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn into_port<E: serde::de::Error>(self) -> std::result::Result<u16, E> {
        match self {
            PortValue::Number(n) => Ok(n),
            PortValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid port {s:?}"))),
        }
    }
}

fn port<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u16, D::Error> {
    PortValue::deserialize(d)?.into_port()
}

fn optional_port<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u16>, D::Error> {
    match Option::<PortValue>::deserialize(d)? {
        None => Ok(None),
        Some(PortValue::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => v.into_port().map(Some),
    }
}
