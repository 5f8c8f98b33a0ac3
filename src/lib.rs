//! Gatekeeper - HTTP Request Throttling
//!
//! This crate implements per-client rate limiting for HTTP servers. Each
//! configured rule owns a [`ratelimit::RateLimiter`] that admits or refuses
//! requests using a fixed window or a sliding log, keyed on the client
//! address and optionally a validated header. A shared blacklist and
//! whitelist are consulted before any counting. The [`web`] module wraps
//! limiters into axum middleware.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod web;
