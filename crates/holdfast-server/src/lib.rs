pub mod channels;
pub mod error;
pub mod routes;
pub mod state;
pub mod ticker;

use std::path::PathBuf;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Actors
        .route("/api/actors/{kind}/{id}", get(routes::actors::get_actor))
        .route(
            "/api/actors/{kind}/{id}/call/{method}",
            post(routes::actors::call_actor),
        )
        .route(
            "/api/actors/{kind}/{id}/connect",
            get(routes::connect::connect_actor),
        )
        // Out-of-band intervention
        .route(
            "/api/intervene/{kind}/{id}",
            post(routes::intervene::intervene),
        )
        // Scheduler
        .route("/api/tasks", get(routes::tasks::list_tasks))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the project at `root`, recover interrupted tasks, start the
/// scheduler loop and serve on `port`.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Like `serve`, on a pre-bound listener.
///
/// The caller can read the actual port before starting (useful when
/// `port = 0` and the OS picks a free port).
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app_state = tokio::task::spawn_blocking(move || {
        let app_state = state::AppState::open(&root)?;
        app_state.host.recover()?;
        Ok::<_, anyhow::Error>(app_state)
    })
    .await??;

    let interval = Duration::from_millis(app_state.host.config().scheduler.tick_interval_ms);
    let ticker = ticker::spawn(app_state.host.clone(), interval);

    tracing::info!("holdfast server listening on http://localhost:{actual_port}");

    let result = axum::serve(listener, build_router(app_state)).await;
    ticker.abort();
    result?;
    Ok(())
}
