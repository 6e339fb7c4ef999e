//! Media search aggregator: binary entrypoint.
//! Boots the Axum HTTP server with the streaming search API and `/metrics`.

use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    media_search_aggregator::telemetry::init_tracing();

    let router = media_search_aggregator::app()?;
    Ok(router.into())
}
