/**
 * ELID KERNEL - Point d'entrée principal du serveur
 *
 * RÔLE : Orchestration des modules : config, persistance, superviseur, HTTP, health.
 * Bootstrap complet avec gestion d'erreurs et logging.
 *
 * CYCLE DE VIE : dotenv -> config -> store -> reprise des équipements actifs
 * -> API REST -> ctrl_c -> arrêt de tous les générateurs.
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use elid_kernel::activation::ActivationSupervisor;
use elid_kernel::auth::Authenticator;
use elid_kernel::config::load_config;
use elid_kernel::gateway::open_gateway;
use elid_kernel::health::HealthTracker;
use elid_kernel::http::{self, AppState};

const HEALTH_REPORT_EVERY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("elid_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    let generator_config = cfg
        .generator_config()
        .context("invalid generator configuration")?;
    let addr = cfg.bind_addr().context("invalid http.bind")?;

    let gateway = open_gateway(&cfg.database.url)
        .await
        .with_context(|| format!("failed to open store {}", cfg.database.url))?;
    info!("[kernel] store backend: {}", gateway.backend());

    let supervisor = Arc::new(ActivationSupervisor::new(gateway.clone(), generator_config));
    if cfg.supervisor.resume_on_start {
        if let Err(e) = supervisor.resume_from_store().await {
            warn!("[kernel] failed to resume active devices: {}", e);
        }
    }

    // health
    let health_tracker = HealthTracker::new(gateway.backend());
    let shutdown = CancellationToken::new();
    health_tracker.spawn_health_reporter(
        gateway.clone(),
        supervisor.clone(),
        HEALTH_REPORT_EVERY,
        shutdown.clone(),
    );

    let auth = Authenticator::new(
        std::env::var("JWT_SECRET").ok(),
        std::env::var("ELID_API_KEY").ok(),
        cfg.token_ttl(),
    );
    if auth.is_closed() {
        warn!("[kernel] neither JWT_SECRET nor ELID_API_KEY set, every /api route will answer 401");
    }

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        gateway,
        supervisor: supervisor.clone(),
        health_tracker,
        auth,
        cors_origins: cfg.http.cors_origins.clone(),
    };
    let app = http::build_router(app_state);

    info!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    shutdown.cancel();
    supervisor.shutdown().await;
    info!("[kernel] bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[kernel] failed to listen for ctrl_c: {}", e);
        // sans signal, on ne s'arrête jamais de nous-mêmes
        std::future::pending::<()>().await;
    }
    info!("[kernel] shutdown requested");
}
