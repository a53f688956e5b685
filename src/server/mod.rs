//! HTTP adapter: every request goes through the [`Pipeline`].

pub mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::Request,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::pipeline::stages::FixedWindowLimiter;
use crate::pipeline::{build_pipeline, Pipeline, RequestContext};
use crate::routes;

pub use shutdown::{ExitReason, Shutdown};

/// Shared application context
#[derive(Clone, Debug)]
pub struct AppContext {
    pub pipeline: Pipeline,
    pub shutdown: Shutdown,
}

/// Create the Axum router. There are no axum routes of its own: the
/// pipeline's router stages do the dispatching.
pub fn create_router(ctx: AppContext, body_limit: usize) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn dispatch(State(ctx): State<AppContext>, request: Request<Body>) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let request_ctx = RequestContext::from_request(request, remote_addr);

    match ctx.pipeline.run(request_ctx).await {
        Ok(response) => response,
        Err(fatal) => {
            tracing::error!("Error : {}", fatal.message);
            ctx.shutdown.trigger_fatal();
            fatal.response
        }
    }
}

/// Drop stale rate-limit counters once per window until shutdown.
pub fn start_prune_task(
    limiter: Arc<FixedWindowLimiter>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let pruned = limiter.prune();
                    if pruned > 0 {
                        tracing::debug!("Pruned {} stale rate-limit counters", pruned);
                    }
                }
            }
        }
    })
}

/// Start the HTTP server and run until a signal or a fatal pipeline error.
pub async fn start_server(config: Config) -> Result<ExitReason> {
    let listener = bind(&config).await?;
    let limiter = Arc::new(FixedWindowLimiter::new(&config.rate_limit));
    let pipeline = build_pipeline(&config, limiter.clone(), routes::api_v1());
    serve_pipeline(&config, listener, pipeline, limiter, Shutdown::new()).await
}

/// Bind the configured host and port.
pub async fn bind(config: &Config) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))
}

/// Serve `pipeline` on a bound listener until `shutdown` fires, then drain
/// in-flight requests for up to the configured timeout.
pub async fn serve_pipeline(
    config: &Config,
    listener: TcpListener,
    pipeline: Pipeline,
    limiter: Arc<FixedWindowLimiter>,
    shutdown: Shutdown,
) -> Result<ExitReason> {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(config.server.port);
    let ctx = AppContext {
        pipeline,
        shutdown: shutdown.clone(),
    };
    let app = create_router(ctx, config.body.upload_limit_bytes);

    let prune_handle = start_prune_task(limiter, shutdown.token());
    let signal_handle = tokio::spawn(shutdown::watch_signals(shutdown.clone()));

    tracing::info!(
        "Server running in {} mode on port {}",
        config.server.mode,
        port
    );

    let token = shutdown.token();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { token.cancelled().await });
    let mut server = tokio::spawn(async move { serve.await });

    tokio::select! {
        result = &mut server => {
            // The server only returns on its own if accepting failed.
            shutdown.trigger();
            result.context("Server task panicked")?.context("Server error")?;
        }
        _ = shutdown.cancelled() => {
            let drain = Duration::from_secs(config.server.drain_timeout_secs);
            match tokio::time::timeout(drain, &mut server).await {
                Ok(result) => {
                    result.context("Server task panicked")?.context("Server error")?;
                }
                Err(_) => {
                    tracing::warn!(
                        "In-flight requests still running after {}s, aborting",
                        drain.as_secs()
                    );
                    server.abort();
                }
            }
        }
    }

    let (prune, signals) = tokio::join!(prune_handle, signal_handle);
    for (task, result) in [("rate-limit prune", prune), ("signal watcher", signals)] {
        if let Err(e) = result {
            tracing::error!("Background task {} failed: {}", task, e);
        }
    }

    let reason = shutdown.reason();
    tracing::info!("Server shutdown complete");
    Ok(reason)
}
