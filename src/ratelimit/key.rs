//! Rate limit key derivation and header validation.

use http::HeaderMap;
use regex::Regex;
use thiserror::Error;

use crate::error::{GatekeeperError, Result};

/// A key that uniquely identifies a throttled client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// The client address alone
    Address(String),
    /// The client address qualified by a validated header value
    Composite { address: String, value: String },
}

impl RateLimitKey {
    /// The client address this key was derived from.
    pub fn address(&self) -> &str {
        match self {
            RateLimitKey::Address(address) => address,
            RateLimitKey::Composite { address, .. } => address,
        }
    }

    /// Convert the key to a string representation.
    ///
    /// This is useful for logging and debugging.
    pub fn to_string_key(&self) -> String {
        match self {
            RateLimitKey::Address(address) => address.clone(),
            RateLimitKey::Composite { address, value } => format!("{}-{}", address, value),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// Why a request could not be given a key.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    #[error("Header value is missing")]
    MissingHeader,
    #[error("Header value is empty")]
    EmptyHeader,
    #[error("Header value does not match required pattern")]
    InvalidHeaderValue,
}

/// Read access to request headers.
pub trait HeaderLookup {
    /// Raw bytes of the first value of `name`, if present.
    fn header_bytes(&self, name: &str) -> Option<&[u8]>;
}

impl HeaderLookup for HeaderMap {
    fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).map(|value| value.as_bytes())
    }
}

impl HeaderLookup for [(&str, &str)] {
    fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_bytes())
    }
}

/// Header-based key configuration, as written by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderKeySpec {
    /// Header whose value qualifies the client address
    pub header_name: String,
    /// Pattern the value must match from its first character
    pub pattern: Option<String>,
    /// Reject present-but-empty values
    pub require_not_empty: bool,
}

impl HeaderKeySpec {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
            pattern: None,
            require_not_empty: true,
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn require_not_empty(mut self, require: bool) -> Self {
        self.require_not_empty = require;
        self
    }
}

/// Derives [`RateLimitKey`]s from requests.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    header: Option<CompiledHeader>,
}

#[derive(Debug, Clone)]
struct CompiledHeader {
    name: String,
    pattern: Option<Regex>,
    require_not_empty: bool,
}

impl KeyExtractor {
    /// Key on the client address only.
    pub fn address_only() -> Self {
        Self { header: None }
    }

    /// Build an extractor, validating the header name and compiling the pattern.
    pub fn new(spec: Option<&HeaderKeySpec>) -> Result<Self> {
        let Some(spec) = spec else {
            return Ok(Self::address_only());
        };

        if http::HeaderName::from_bytes(spec.header_name.as_bytes()).is_err() {
            return Err(GatekeeperError::InvalidHeaderName(spec.header_name.clone()));
        }

        let pattern = spec
            .pattern
            .as_deref()
            .map(|pattern| {
                // Values are matched from their first character onwards.
                Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
                    GatekeeperError::InvalidPattern {
                        pattern: pattern.to_string(),
                        source,
                    }
                })
            })
            .transpose()?;

        Ok(Self {
            header: Some(CompiledHeader {
                name: spec.header_name.clone(),
                pattern,
                require_not_empty: spec.require_not_empty,
            }),
        })
    }

    /// Name of the header this extractor reads, if any.
    pub fn header_name(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.name.as_str())
    }

    /// Derive the key for a request from `address`.
    ///
    /// Checks run in a fixed order: presence, emptiness, pattern.
    pub fn extract<H>(
        &self,
        address: &str,
        headers: &H,
    ) -> std::result::Result<RateLimitKey, KeyRejection>
    where
        H: HeaderLookup + ?Sized,
    {
        let Some(header) = &self.header else {
            return Ok(RateLimitKey::Address(address.to_string()));
        };

        let raw = headers
            .header_bytes(&header.name)
            .ok_or(KeyRejection::MissingHeader)?;

        if raw.is_empty() && header.require_not_empty {
            return Err(KeyRejection::EmptyHeader);
        }

        let value = std::str::from_utf8(raw).map_err(|_| KeyRejection::InvalidHeaderValue)?;

        if let Some(pattern) = &header.pattern {
            if !pattern.is_match(value) {
                return Err(KeyRejection::InvalidHeaderValue);
            }
        }

        Ok(RateLimitKey::Composite {
            address: address.to_string(),
            value: value.to_string(),
        })
    }
}
