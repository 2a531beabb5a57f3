pub mod auth;
pub mod embed;
pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use state::AppState;

/// Where the UI files come from.
#[derive(Debug, Clone)]
pub enum Assets {
    /// Files compiled into the binary.
    Embedded,
    /// Files served from disk, for editing the UI without rebuilding.
    Directory(PathBuf),
}

/// Build the axum Router with all routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(state: AppState, assets: Assets) -> Router {
    let router = Router::new()
        .route("/open/{door}", post(routes::doors::open_door))
        .route("/api/doors", get(routes::doors::list_doors));

    let router = match assets {
        Assets::Embedded => router.fallback(embed::static_handler),
        Assets::Directory(dir) => {
            tracing::warn!(dir = %dir.display(), "developer mode: serving UI files from disk");
            router.fallback_service(ServeDir::new(dir))
        }
    };

    // The auth layer wraps the static fallback too: the UI itself is private.
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Serve on a pre-bound listener until `shutdown` resolves.
///
/// After the shutdown signal, in-flight requests (and their holds) are
/// allowed to finish, then every door line is driven low regardless of
/// whether serving ended cleanly.
pub async fn serve_on<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    assets: Assets,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let registry = Arc::clone(&state.registry);
    let app = build_router(state, assets);

    tracing::info!(%addr, "zvezda listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    let released = registry.release_all();
    served?;
    released?;
    Ok(())
}
