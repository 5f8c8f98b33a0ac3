//! HTTP surface: rate limiting middleware, denial responses and the server.

mod responses;
mod server;
mod service;

pub use responses::{
    bad_request_response, forbidden_response, rate_limited_response, FnResponder, Responder,
    ResponseOverrides, StaticResponse, X_RATELIMIT_REMAINING,
};
pub use server::{build_router, spawn_sweeper, HttpServer};
pub use service::{Pipeline, RateLimitLayer, RateLimitService, Stage, StageOutcome, UNKNOWN_ADDRESS};
