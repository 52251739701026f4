//! Control-channel message exchanged once per session
//!
//! After the client authenticates, the server answers with a fixed-width
//! 80-byte text message. Its logical content is two comma separated fields;
//! field 1 carries `"<domain>:<gateway port>"`. The encoded form is the string
//! `",<domain>:<port>"` left-padded with spaces to exactly 80 bytes.

use crate::constants::{CONTROL_FIELD_SEPARATOR, CONTROL_MESSAGE_LEN};

/// Control message errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("control message too long: {len} bytes exceeds limit of {limit} bytes")]
    TooLong { len: usize, limit: usize },

    #[error("domain name must not contain '{CONTROL_FIELD_SEPARATOR}'")]
    InvalidDomain,

    #[error("control message must be exactly {expected} bytes, got {len}")]
    InvalidLength { len: usize, expected: usize },

    #[error("control message is not valid UTF-8")]
    InvalidEncoding,

    #[error("control message has no gateway address field")]
    MissingField,

    #[error("invalid gateway port in {0:?}")]
    InvalidPort(String),
}

/// Gateway announcement sent by the server on the control stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    domain: String,
    port: u16,
}

impl ControlMessage {
    pub fn new(domain: impl Into<String>, port: u16) -> Self {
        Self {
            domain: domain.into(),
            port,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `"<domain>:<port>"`, the content of field 1
    pub fn gateway_address(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    /// The message before padding: `",<domain>:<port>"`
    pub fn unpadded(&self) -> String {
        format!("{CONTROL_FIELD_SEPARATOR}{}", self.gateway_address())
    }

    /// Encode to the fixed 80-byte wire form.
    ///
    /// Content longer than 80 bytes is outside the protocol and is rejected
    /// rather than truncated. Only the actual port counts towards the limit.
    pub fn encode(&self) -> Result<[u8; CONTROL_MESSAGE_LEN], ControlError> {
        if self.domain.contains(CONTROL_FIELD_SEPARATOR) {
            return Err(ControlError::InvalidDomain);
        }

        let content = self.unpadded();
        let len = content.len();
        if len > CONTROL_MESSAGE_LEN {
            return Err(ControlError::TooLong {
                len,
                limit: CONTROL_MESSAGE_LEN,
            });
        }

        let mut out = [b' '; CONTROL_MESSAGE_LEN];
        out[CONTROL_MESSAGE_LEN - len..].copy_from_slice(content.as_bytes());
        Ok(out)
    }

    /// Decode the wire form into domain and port.
    pub fn decode(buf: &[u8]) -> Result<Self, ControlError> {
        let address = decode_gateway_address(buf)?;
        let (domain, port) = address
            .rsplit_once(':')
            .ok_or_else(|| ControlError::InvalidPort(address.to_string()))?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ControlError::InvalidPort(address.to_string()))?;
        Ok(Self::new(domain, port))
    }
}

/// Split the 80-byte message on `,` and return field 1 verbatim.
pub fn decode_gateway_address(buf: &[u8]) -> Result<&str, ControlError> {
    if buf.len() != CONTROL_MESSAGE_LEN {
        return Err(ControlError::InvalidLength {
            len: buf.len(),
            expected: CONTROL_MESSAGE_LEN,
        });
    }
    let text = std::str::from_utf8(buf).map_err(|_| ControlError::InvalidEncoding)?;
    text.split(CONTROL_FIELD_SEPARATOR)
        .nth(1)
        .ok_or(ControlError::MissingField)
}

/// Check that a domain fits a control message for every possible gateway port.
pub fn validate_domain(domain: &str) -> Result<(), ControlError> {
    if domain.contains(CONTROL_FIELD_SEPARATOR) {
        return Err(ControlError::InvalidDomain);
    }
    // Worst case port is five digits
    let worst_case = domain.len() + ",:65535".len();
    if worst_case > CONTROL_MESSAGE_LEN {
        return Err(ControlError::TooLong {
            len: worst_case,
            limit: CONTROL_MESSAGE_LEN,
        });
    }
    Ok(())
}
