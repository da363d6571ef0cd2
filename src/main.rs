use axum::Router;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use funnelserver::config::AppConfig;
use funnelserver::shared::state::AppState;
use funnelserver::shared::utils::create_conn;
use funnelserver::{contacts, funnel, notifications, opportunity, pipeline, scheduler};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let pool = match create_conn(&config.database_url) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create database pool: {e}");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
    });

    if let Err(e) = scheduler::spawn_sla_monitor(state.clone()) {
        error!("Invalid SLA cron expression \"{}\": {e}", config.pipeline.sla_cron);
        std::process::exit(1);
    }

    let app = Router::new()
        .merge(funnel::configure_funnel_routes())
        .merge(opportunity::configure_opportunity_routes())
        .merge(pipeline::configure_pipeline_routes())
        .merge(notifications::configure_notification_routes())
        .merge(contacts::configure_contact_routes())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("funnelserver listening on {addr}");
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {e}");
    }
}
