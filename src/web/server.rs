//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::responses::ResponseOverrides;
use super::service::{Pipeline, Stage};
use crate::config::GatekeeperConfig;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{ListPolicy, RateLimiter, RuleConfig};

/// HTTP server serving the configured, rate limited routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes with their rate limit layers applied
    router: Router,
    /// Every limiter mounted on the router
    limiters: Vec<Arc<RateLimiter>>,
    /// How often expired window state is reclaimed
    sweep_interval: Duration,
}

impl HttpServer {
    /// Build the server from configuration, sharing `lists` between all limiters.
    pub fn from_config(config: &GatekeeperConfig, lists: Arc<ListPolicy>) -> Result<Self> {
        let (router, limiters) = build_router(&config.rate_limiting.rules, lists)?;
        Ok(Self {
            addr: config.server.http_addr,
            router,
            limiters,
            sweep_interval: Duration::from_secs(config.rate_limiting.sweep_interval_secs.max(1)),
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn limiters(&self) -> &[Arc<RateLimiter>] {
        &self.limiters
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let sweeper = spawn_sweeper(self.limiters.clone(), self.sweep_interval);

        info!(
            addr = %self.addr,
            routes = self.limiters.len(),
            "Starting HTTP server with graceful shutdown"
        );

        let result = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await;

        sweeper.abort();

        result.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}

/// Mount one limiter per rule on its path.
///
/// Rules sharing a path become consecutive stages of the same pipeline, in
/// the order they are listed.
pub fn build_router(
    rules: &[RuleConfig],
    lists: Arc<ListPolicy>,
) -> Result<(Router, Vec<Arc<RateLimiter>>)> {
    let mut pipelines: Vec<(String, Pipeline)> = Vec::new();
    let mut limiters = Vec::with_capacity(rules.len());

    for rule in rules {
        let limiter = Arc::new(RateLimiter::new(rule.to_limiter_config()?, lists.clone())?);
        let responses = ResponseOverrides::from_config(&rule.responses)?;
        let stage = Stage::new(limiter.clone()).with_responses(responses);

        info!(
            name = %rule.display_name(),
            path = %rule.path,
            limit = rule.limit,
            algorithm = ?rule.algorithm,
            "Registered rate limit rule"
        );

        match pipelines.iter_mut().find(|(path, _)| *path == rule.path) {
            Some((_, pipeline)) => *pipeline = std::mem::take(pipeline).stage(stage),
            None => pipelines.push((rule.path.clone(), Pipeline::new().stage(stage))),
        }
        limiters.push(limiter);
    }

    let router = pipelines
        .into_iter()
        .fold(Router::new(), |router, (path, pipeline)| {
            router.route(&path, any(echo).layer(pipeline.into_layer()))
        });

    Ok((router, limiters))
}

/// Periodically reclaim expired window state on every limiter.
pub fn spawn_sweeper(limiters: Vec<Arc<RateLimiter>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed: usize = limiters.iter().map(|limiter| limiter.sweep()).sum();
            if removed > 0 {
                info!(removed = removed, "Reclaimed expired rate limit state");
            }
        }
    })
}

/// Handler behind every configured route.
async fn echo(request: Request) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "method": request.method().as_str(),
        "path": request.uri().path(),
    }))
}
