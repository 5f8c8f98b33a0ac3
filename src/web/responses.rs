//! Denial responses and caller-supplied overrides.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::RETRY_AFTER;
use http::request::Parts;
use http::{HeaderName, HeaderValue, StatusCode};
use serde_json::json;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{Denial, KeyRejection, ResponseConfig, ResponsesConfig};

/// Seconds until the caller's window frees up.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Produces a response for a refused request.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: &Parts) -> Response;
}

/// Adapts a plain function into a [`Responder`].
pub struct FnResponder<F>(pub F);

#[async_trait]
impl<F> Responder for FnResponder<F>
where
    F: Fn(&Parts) -> Response + Send + Sync,
{
    async fn respond(&self, request: &Parts) -> Response {
        (self.0)(request)
    }
}

/// A fixed JSON response, typically declared in configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticResponse {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl<'a> TryFrom<&'a ResponseConfig> for StaticResponse {
    type Error = GatekeeperError;

    fn try_from(config: &'a ResponseConfig) -> Result<Self> {
        let status = StatusCode::from_u16(config.status).map_err(|_| {
            GatekeeperError::Config(format!("invalid response status {}", config.status))
        })?;
        Ok(Self {
            status,
            body: config.body.clone(),
        })
    }
}

#[async_trait]
impl Responder for StaticResponse {
    async fn respond(&self, _request: &Parts) -> Response {
        (self.status, Json(self.body.clone())).into_response()
    }
}

/// Optional replacements for the default denial responses.
///
/// A missing-header denial without its own override falls back to the
/// rate-limited override; an empty-header denial tries the missing-header
/// override first.
#[derive(Clone, Default)]
pub struct ResponseOverrides {
    pub rate_limited: Option<Arc<dyn Responder>>,
    pub missing_header: Option<Arc<dyn Responder>>,
    pub empty_header: Option<Arc<dyn Responder>>,
    pub invalid_header_value: Option<Arc<dyn Responder>>,
    pub blacklisted: Option<Arc<dyn Responder>>,
}

impl ResponseOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_limited(mut self, responder: impl Responder + 'static) -> Self {
        self.rate_limited = Some(Arc::new(responder));
        self
    }

    pub fn missing_header(mut self, responder: impl Responder + 'static) -> Self {
        self.missing_header = Some(Arc::new(responder));
        self
    }

    pub fn empty_header(mut self, responder: impl Responder + 'static) -> Self {
        self.empty_header = Some(Arc::new(responder));
        self
    }

    pub fn invalid_header_value(mut self, responder: impl Responder + 'static) -> Self {
        self.invalid_header_value = Some(Arc::new(responder));
        self
    }

    pub fn blacklisted(mut self, responder: impl Responder + 'static) -> Self {
        self.blacklisted = Some(Arc::new(responder));
        self
    }

    /// Build overrides from the `responses` section of a rule.
    pub fn from_config(config: &ResponsesConfig) -> Result<Self> {
        fn load(config: &Option<ResponseConfig>) -> Result<Option<Arc<dyn Responder>>> {
            config
                .as_ref()
                .map(|c| StaticResponse::try_from(c).map(|r| Arc::new(r) as Arc<dyn Responder>))
                .transpose()
        }

        Ok(Self {
            rate_limited: load(&config.rate_limited)?,
            missing_header: load(&config.missing_header)?,
            empty_header: load(&config.empty_header)?,
            invalid_header_value: load(&config.invalid_header_value)?,
            blacklisted: load(&config.blacklisted)?,
        })
    }

    /// Build the response for a denial.
    pub async fn respond(&self, denial: Denial, request: &Parts) -> Response {
        match denial {
            Denial::RateLimited { retry_after_secs } => {
                let mut response = match &self.rate_limited {
                    Some(responder) => responder.respond(request).await,
                    None => rate_limited_response(retry_after_secs),
                };
                let headers = response.headers_mut();
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(retry_after_secs));
                response
            }
            Denial::Blacklisted => match &self.blacklisted {
                Some(responder) => responder.respond(request).await,
                None => forbidden_response(),
            },
            Denial::InvalidKey(rejection) => {
                let responder = match rejection {
                    KeyRejection::MissingHeader => {
                        self.missing_header.as_ref().or(self.rate_limited.as_ref())
                    }
                    KeyRejection::EmptyHeader => self
                        .empty_header
                        .as_ref()
                        .or(self.missing_header.as_ref())
                        .or(self.rate_limited.as_ref()),
                    KeyRejection::InvalidHeaderValue => self.invalid_header_value.as_ref(),
                };
                match responder {
                    Some(responder) => responder.respond(request).await,
                    None => bad_request_response(rejection),
                }
            }
        }
    }
}

impl std::fmt::Debug for ResponseOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseOverrides")
            .field("rate_limited", &self.rate_limited.is_some())
            .field("missing_header", &self.missing_header.is_some())
            .field("empty_header", &self.empty_header.is_some())
            .field("invalid_header_value", &self.invalid_header_value.is_some())
            .field("blacklisted", &self.blacklisted.is_some())
            .finish()
    }
}

/// 429 with the retry delay in the body.
pub fn rate_limited_response(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Rate limit exceeded",
            "retry_after": retry_after_secs,
        })),
    )
        .into_response()
}

/// 403 for blacklisted clients.
pub fn forbidden_response() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "status": 403,
            "description": "Forbidden",
        })),
    )
        .into_response()
}

/// 400 describing why no key could be derived.
pub fn bad_request_response(rejection: KeyRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": rejection.to_string() })),
    )
        .into_response()
}
