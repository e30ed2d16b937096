use manna_services::{
    AppState,
    config::Config,
    database,
    documents::PgDocumentStore,
    mail::LettreMailer,
    routes, telemetry,
    users::{PgUserStorage, Realm, TokenSigner},
};
use std::net::{IpAddr, SocketAddr};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const BUILD_DATE: &str = env!("BUILD_DATE");
const BUILD_COMMIT: &str = env!("BUILD_COMMIT");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    let config: Config = Config::init()?;
    telemetry::init_tracing(&config)?;
    print_build_info();
    info!(
        environment = %config.environment(),
        server_addr = %config.server_addr(),
        port = %config.port(),
        "Configuration loaded"
    );

    let pool = database::create_pool(&config).await?;
    let mailer = LettreMailer::from_config(&config)?;

    let state = AppState::new(
        PgDocumentStore::new(pool.clone()),
        PgUserStorage::new(pool.clone(), Realm::User),
        PgUserStorage::new(pool, Realm::Admin),
        mailer,
        TokenSigner::from_config(&config),
    );
    let route = routes(state, config.clone());

    let addr = SocketAddr::from((config.server_addr().parse::<IpAddr>()?, config.port()));
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, route)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
}

fn print_build_info() {
    info!("===========================================");
    info!("  Manna Services");
    info!("===========================================");
    info!("Build Date:   {}", BUILD_DATE);
    info!("Build Commit: {}", BUILD_COMMIT);
    info!("===========================================");
}
