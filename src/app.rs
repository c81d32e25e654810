/*
 * Responsibility
 * - Config読み込み → 依存生成 (verifier / audit queue) → Router 組み立て
 * - Middleware の適用 (access log / request-id / trace)
 * - axum::serve() で起動、終了時はアクセスログのキューを drain
 */
use std::{panic, process, sync::Arc};

use axum::Router;
use tokio::task::JoinHandle;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::{FilterExt, filter_fn},
    fmt::MakeWriter,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::Config;
use crate::error::AppError;
use crate::services::audit::{ACCESS_LOG_TARGET, AuditLogger, TracingSink};
use crate::services::auth::{IdTokenVerifier, build_verifier};
use crate::state::AppState;
use crate::{api, middleware};

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,access_gate=debug,tower_http=debug cargo run
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(diagnostics_layer(filter, std::io::stdout))
        .with(access_log_layer(std::io::stderr))
        .init();
}

fn is_access_log(meta: &Metadata<'_>) -> bool {
    meta.target() == ACCESS_LOG_TARGET
}

// Diagnostics: RUST_LOG controlled, never carries access-log lines.
fn diagnostics_layer<S, W>(filter: EnvFilter, writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_filter(filter.and(filter_fn(|meta| !is_access_log(meta))))
}

// Access log: always on, one bare line per event. Spans from other targets are
// filtered out for this layer, so no span context gets printed either.
fn access_log_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_filter(filter_fn(is_access_log))
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panic via tracing so they don't get "lost"
        tracing::error!(?info, "panic");

        // In development, fail fast: crash the whole process so we notice immediately.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let config = Config::from_env()?;
    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        issuer = %config.issuer,
        jwks_url = %config.jwks_url(),
        "starting access gate in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let verifier = build_verifier(&config)?;
    prefetch_keys(&verifier);

    let (audit, worker) = AuditLogger::channel(config.audit_queue_capacity);
    let audit_task = worker.spawn(TracingSink);

    let state = AppState::new(verifier, audit);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and every AuditLogger clone in it) is gone; the worker stops
    // once the queue is empty.
    drain_audit(audit_task, &config).await;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let router = api::routes();
    let router = middleware::access_log::apply(router, state.clone());
    let router = router.with_state(state);

    middleware::http::apply(router)
}

// Warm the key cache so the first request doesn't pay for the fetch. Failure is
// fine: verification fetches again on demand.
fn prefetch_keys(verifier: &Arc<IdTokenVerifier>) {
    let key_set = verifier.key_set();
    tokio::spawn(async move {
        if let Err(err) = key_set.refresh_after(0).await {
            tracing::warn!(error = %err, url = %key_set.jwks_url(), "initial key set fetch failed");
        }
    });
}

async fn drain_audit(audit_task: JoinHandle<u64>, config: &Config) {
    match tokio::time::timeout(config.audit_drain_timeout, audit_task).await {
        Ok(Ok(written)) => tracing::info!(written, "access log drained"),
        Ok(Err(err)) => tracing::error!(error = %err, "access log worker failed"),
        Err(_) => tracing::warn!(
            timeout = ?config.audit_drain_timeout,
            "access log drain timed out, dropping queued records"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
