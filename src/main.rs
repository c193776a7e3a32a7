use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use http::HeaderValue;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use agrismart_orders as api;
use api::{
    circuit_breaker::CircuitBreaker,
    handlers::{AppServices, PaymentSettings},
    repositories::{InMemoryCatalog, InMemoryOrderRepository},
    services::HttpPaymentGateway,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let catalog = match cfg.catalog_seed_path.as_deref() {
        Some(path) => InMemoryCatalog::from_json_file(path)?,
        None => {
            warn!("No catalog_seed_path configured; starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };
    let orders = InMemoryOrderRepository::new();

    let gateway = HttpPaymentGateway::new(
        cfg.payment_gateway.base_url.clone(),
        cfg.payment_gateway.key_id.clone(),
        cfg.payment_gateway.key_secret.clone(),
        cfg.payment_gateway.timeout(),
        CircuitBreaker::new("payment_gateway", cfg.circuit_breaker()),
    )
    .context("failed to build payment gateway client")?;
    if !cfg.payment_gateway.has_credentials() {
        warn!("Payment gateway credentials are not configured; gateway order creation will fail");
    }

    let services = AppServices::new(
        Arc::new(orders),
        Arc::new(catalog),
        Arc::new(gateway),
        cfg.pricing_policy(),
        PaymentSettings {
            key_secret: cfg.payment_gateway.key_secret.clone(),
            default_currency: cfg.default_currency.clone(),
            receipt_prefix: cfg.payment_gateway.receipt_prefix.clone(),
        },
    );

    let auth = Arc::new(api::auth::AuthService::new(&cfg.jwt_secret, cfg.jwt_ttl()));

    // Build CORS layer from config
    let configured_origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let cors_layer = if !configured_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(configured_origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(cfg.cors_allow_credentials)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        anyhow::bail!(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
        );
    };

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;

    let app_state = api::AppState {
        config: cfg,
        auth,
        services,
    };
    let app = api::build_router(app_state).layer(cors_layer);

    info!("agrismart-orders listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
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
    info!("Shutdown signal received");
}
