use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stagdb_agent::auth::get_or_create_api_key;
use stagdb_agent::executor::executor_for;
use stagdb_agent::host::validate_host;
use stagdb_agent::models::{Host, LastAction, ValidationStatus};
use stagdb_agent::orchestrator::DatabaseManager;
use stagdb_agent::routes::routes;
use stagdb_agent::settings::{load_settings, ExecutionMode};
use stagdb_agent::store::StateStore;

//-----------------------------------------------------
// MAIN FUNCTION
//-----------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting StagDB agent");
    let settings = load_settings();

    let executor = executor_for(&settings.host);
    info!(executor = %executor.describe(), "command executor selected");

    let state_path = settings.storage.state_path();
    let store = StateStore::open(&state_path)?;
    info!(path = %state_path.display(), "state store opened");

    // Register (or refresh) this host, then validate it
    let mut host = store.upsert_host(Host {
        id: 0,
        name: settings.host.name.clone(),
        address: settings.host.address.clone(),
        zfs_pool: settings.host.zfs_pool.clone(),
        is_active: true,
        is_docker_host: settings.host.execution == ExecutionMode::Nsenter,
        validation_status: ValidationStatus::Pending,
        last_validated: None,
        zfs_version: None,
        docker_version: None,
    })?;
    match settings.host.validation_status {
        Some(status) => {
            info!(status = ?status, "host validation skipped, using configured status");
            host.validation_status = status;
        }
        None => {
            let report =
                validate_host(executor.as_ref(), &host.zfs_pool, settings.timeouts.probe()).await;
            report.apply_to(&mut host);
        }
    }
    let host = store.upsert_host(host)?;

    let manager = match DatabaseManager::new(host, executor, store, &settings) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "host is not usable, refusing to start");
            return Err(e.into());
        }
    };

    // Generate or read API key
    let api_key = get_or_create_api_key(Path::new(&settings.server.api_key_file))?;
    println!("\nAPI Key: {}", api_key);

    let last_action = Arc::new(RwLock::new(None::<LastAction>));
    let routes = routes(manager, api_key, last_action);

    let address: IpAddr = settings.server.listen_address.parse()?;
    info!(%address, port = settings.server.port, "server starting");
    warp::serve(routes).run((address, settings.server.port)).await;

    Ok(())
}
