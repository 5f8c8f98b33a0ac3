//! Rate limiting middleware for axum routes.
//!
//! A [`Pipeline`] is an ordered list of named [`Stage`]s, each backed by one
//! [`RateLimiter`]. Turning it into a [`RateLimitLayer`] lets it wrap any
//! route; the wrapped handler runs only when every stage admits the request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::Response;
use futures::future::BoxFuture;
use http::request::Parts;
use http::{HeaderValue, Request};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::responses::{ResponseOverrides, X_RATELIMIT_REMAINING};
use crate::ratelimit::{Decision, RateLimiter};

/// Client address used when the connection address is unavailable.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Result of running a stage or a whole pipeline.
pub enum StageOutcome {
    /// Keep going. `remaining_secs` is `None` when nothing was counted.
    Continue { remaining_secs: Option<u64> },
    /// Stop and send this response instead of calling the handler.
    Respond(Response),
}

/// One named limiter step in a pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    limiter: Arc<RateLimiter>,
    responses: ResponseOverrides,
}

impl Stage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            responses: ResponseOverrides::default(),
        }
    }

    pub fn with_responses(mut self, responses: ResponseOverrides) -> Self {
        self.responses = responses;
        self
    }

    pub fn name(&self) -> &str {
        self.limiter.name()
    }

    /// Decide `request` from `address`, producing the denial response if any.
    pub async fn run(&self, request: &Parts, address: &str) -> StageOutcome {
        match self.limiter.check(address, &request.headers) {
            Decision::Admit { remaining_secs } => StageOutcome::Continue { remaining_secs },
            Decision::Deny(denial) => {
                debug!(
                    stage = %self.name(),
                    address = %address,
                    path = %request.uri.path(),
                    denial = ?denial,
                    "Request refused"
                );
                StageOutcome::Respond(self.responses.respond(denial, request).await)
            }
        }
    }
}

/// Ordered list of stages.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in insertion order.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Run every stage until one responds.
    ///
    /// On success the reported remaining time is the smallest one among the
    /// stages that counted the request.
    pub async fn run(&self, request: &Parts, address: &str) -> StageOutcome {
        let mut remaining: Option<u64> = None;

        for stage in &self.stages {
            match stage.run(request, address).await {
                StageOutcome::Continue {
                    remaining_secs: Some(secs),
                } => {
                    remaining = Some(remaining.map_or(secs, |current| current.min(secs)));
                }
                StageOutcome::Continue {
                    remaining_secs: None,
                } => {}
                respond @ StageOutcome::Respond(_) => return respond,
            }
        }

        StageOutcome::Continue {
            remaining_secs: remaining,
        }
    }

    pub fn into_layer(self) -> RateLimitLayer {
        RateLimitLayer::new(self)
    }
}

/// Rate limiting layer.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    pipeline: Arc<Pipeline>,
}

impl RateLimitLayer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Rate limiting service.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let address = client_address(&parts);

            match pipeline.run(&parts, &address).await {
                StageOutcome::Respond(response) => Ok(response),
                StageOutcome::Continue { remaining_secs } => {
                    let mut response = inner.call(Request::from_parts(parts, body)).await?;
                    if let Some(secs) = remaining_secs {
                        response
                            .headers_mut()
                            .insert(X_RATELIMIT_REMAINING, HeaderValue::from(secs));
                    }
                    Ok(response)
                }
            }
        })
    }
}

/// The peer IP recorded by `into_make_service_with_connect_info`.
fn client_address(request: &Parts) -> String {
    match request.extensions.get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => {
            warn!(
                path = %request.uri.path(),
                "No connection info on request, using placeholder client address"
            );
            UNKNOWN_ADDRESS.to_string()
        }
    }
}
