//! Tribunal API - Content Governance Service
//!
//! Senior members author structured, block-based lessons and submit them
//! for review. A lesson is published only when every eligible reviewer
//! approves it; a single rejection vetoes it.
//!
//! Lifecycle: draft -> pending -> approved | rejected. A pending proposal can
//! be withdrawn back to draft, and a rejected one can seed a revision draft.

mod config;
mod error;
mod identity;
mod members;
mod models;
mod routes;
mod state;
mod tribunal;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Tribunal - Content Governance Service...");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "📋 Configuration loaded (reviewer level: {}, self-vote: {})",
        settings.tribunal.reviewer_level, settings.tribunal.allow_self_vote
    );

    let state = Arc::new(AppState::new(&settings.tribunal).await?);
    info!(
        "✅ Loaded {} proposals",
        state.proposals.count().await
    );

    // Build the router
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Members ───");
    info!("   POST /api/members                    - Register calling identity");
    info!("   GET  /api/members/roster             - Current reviewers");
    info!("");
    info!("   ─── Proposals ───");
    info!("   POST /api/proposals                  - Create draft");
    info!("   GET  /api/proposals                  - List proposals");
    info!("   POST /api/proposals/{{id}}/blocks      - Insert block");
    info!("   POST /api/proposals/{{id}}/submit      - Submit for review");
    info!("   POST /api/proposals/{{id}}/withdraw    - Back to draft");
    info!("   POST /api/proposals/{{id}}/revise      - Revise a rejected proposal");
    info!("");
    info!("   ─── Consensus ───");
    info!("   POST /api/proposals/{{id}}/votes       - Approve or reject");
    info!("   GET  /api/proposals/{{id}}/tally       - Voting progress");
    info!("   GET  /api/audit                      - Lifecycle audit log");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tribunal_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
