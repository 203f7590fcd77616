mod frame;
mod rate_limit;
mod routes;
mod state;

use presence::PresenceConfig;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let presence = PresenceConfig::from_env();
    let state = state::AppState::new(rate_limit::WriteLimitConfig::from_env());
    let write_limits = state.write_limiter.config();
    tracing::info!(
        write_limit = write_limits.limit,
        write_window_ms = u64::try_from(write_limits.window.as_millis()).unwrap_or(u64::MAX),
        collection = %presence.collection,
        stale_after_ms = presence.stale_after_ms,
        "store configured"
    );

    let app = routes::app_with_site(state, routes::website_dir());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "cursorcast listening");
    axum::serve(listener, app).await.expect("server failed");
}
