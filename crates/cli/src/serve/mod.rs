//! `helpdesk serve`: HTTP JSON API over the ticket workflow.
//!
//! Security features:
//! - Caller identity from the `X-User-Id` header, resolved through the
//!   configured user directory (unknown or inactive users get 401)
//! - Optional API key (`[server] api_key` or `HELPDESK_API_KEY`)
//! - Per-IP rate limiting (default: 60 req/min)
//! - Permissive CORS, 1 MB body limit
//!
//! Endpoints:
//! - GET  /health                              - Server status (exempt from auth)
//! - POST /tickets                             - Create a ticket
//! - GET  /tickets                             - List tickets (scope, status, type, priority)
//! - GET  /tickets/{id}                        - One ticket, by id or number
//! - GET  /tickets/{id}/history                - Audit trail
//! - GET  /tickets/{id}/rejection-reason       - Motive of the latest rejection
//! - PUT  /tickets/{id}/assign|reassign|reopen - Assignment transitions
//! - PUT  /tickets/{id}/escalate               - Raise priority one level
//! - PUT  /tickets/{id}/status                 - in_progress, resolved or closed
//! - PUT  /tickets/{id}/validate               - Creator validates or rejects
//! - PUT  /tickets/{id}/feedback               - Creator rates a closed ticket
//! - PUT  /tickets/{id}/accept-assignment      - Technician accepts
//! - PUT  /tickets/{id}/decline-assignment     - Technician hands back
//! - PUT  /tickets/{id}/delegate               - Director delegates to a deputy
//! - GET|POST /tickets/{id}/comments           - Comments
//! - GET  /tickets/{id}/candidates             - Eligible technicians by workload
//! - GET  /technicians/{id}/workload           - Active ticket count
//!
//! All responses use Content-Type: application/json.

mod error;
mod handlers;
mod middleware;
mod state;
mod technicians;
mod tickets;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{middleware as axum_middleware, Json, Router};
use helpdesk_storage::SqliteStore;
use helpdesk_workflow::{DelegationRegistry, SweepConfig, TicketWorkflow};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::webhook::build_emitter;

use self::handlers::{handle_health, handle_not_found};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Open the configured store: the SQLite database at `[storage] data_file`,
/// or a private in-memory database when none is set.
pub(crate) fn open_store(config: &Config) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    match &config.storage.data_file {
        Some(path) => Ok(SqliteStore::open(path)?),
        None => Ok(SqliteStore::open_in_memory()?),
    }
}

/// Build the workflow over `store` with the configured directory and emitters.
pub(crate) fn build_workflow(
    config: &Config,
    store: Arc<SqliteStore>,
) -> Result<TicketWorkflow<SqliteStore>, Box<dyn std::error::Error>> {
    let directory = Arc::new(config.directory()?);
    Ok(TicketWorkflow::new(
        store,
        directory.clone(),
        directory,
        build_emitter(&config.notifications),
    ))
}

fn router(state: Arc<AppState>) -> Router {
    // CORS: permissive; the service sits behind the intranet gateway
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/tickets",
            post(tickets::handle_create).get(tickets::handle_list),
        )
        .route("/tickets/{id}", get(tickets::handle_get))
        .route("/tickets/{id}/history", get(tickets::handle_history))
        .route(
            "/tickets/{id}/rejection-reason",
            get(tickets::handle_rejection_reason),
        )
        .route("/tickets/{id}/assign", put(tickets::handle_assign))
        .route("/tickets/{id}/reassign", put(tickets::handle_reassign))
        .route("/tickets/{id}/reopen", put(tickets::handle_reopen))
        .route("/tickets/{id}/escalate", put(tickets::handle_escalate))
        .route("/tickets/{id}/status", put(tickets::handle_status))
        .route("/tickets/{id}/validate", put(tickets::handle_validate))
        .route("/tickets/{id}/feedback", put(tickets::handle_feedback))
        .route(
            "/tickets/{id}/accept-assignment",
            put(tickets::handle_accept),
        )
        .route(
            "/tickets/{id}/decline-assignment",
            put(tickets::handle_decline),
        )
        .route("/tickets/{id}/delegate", put(tickets::handle_delegate))
        .route(
            "/tickets/{id}/comments",
            get(tickets::handle_list_comments).post(tickets::handle_add_comment),
        )
        .route("/tickets/{id}/candidates", get(tickets::handle_candidates))
        .route(
            "/technicians/{id}/workload",
            get(technicians::handle_workload),
        )
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Run the sweep every `interval` until the task is aborted.
fn spawn_sweeper(
    workflow: TicketWorkflow<SqliteStore>,
    config: SweepConfig,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately; skip it so startup stays quiet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = workflow.sweep(&config, OffsetDateTime::now_utc()).await {
                warn!(error = %e, "sweep failed");
            }
        }
    })
}

/// Start the HTTP server.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub async fn start_server(
    config: Config,
    port: u16,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(open_store(&config)?);
    match store.path() {
        Some(path) => info!(data_file = %path.display(), "persisting tickets"),
        None => warn!("no [storage] data_file configured; tickets are kept in memory only"),
    }
    let directory = Arc::new(config.directory()?);
    let workflow = build_workflow(&config, store.clone())?;
    let delegation = DelegationRegistry::new(store, directory.clone());

    if config.server.api_key.is_some() {
        info!("API key authentication enabled");
    }
    info!(
        rate_limit = config.server.rate_limit,
        users = directory.len(),
        "rate limit is per IP per minute"
    );

    let sweeper = config
        .sweep
        .interval()
        .map(|every| spawn_sweeper(workflow.clone(), config.sweep.sweep_config(), every));

    let notifier = workflow.clone();
    let state = Arc::new(AppState {
        workflow,
        delegation,
        directory,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        api_key: config.server.api_key.clone(),
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let tls =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        info!("helpdesk listening on https://0.0.0.0:{}", port);
        axum_server::bind_rustls(socket_addr, tls)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        notifier.flush_notifications().await;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("helpdesk listening on http://0.0.0.0:{}", port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(task) = sweeper {
        task.abort();
    }
    notifier.flush_notifications().await;
    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl+C; shut down by terminating the process");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
