//! Process wiring: one deployment manager, one queue engine, one sweep loop.
//! Construction happens exactly once per process; the components themselves
//! are plain injected service objects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::Config;
use crate::deployment::sweep::Sweep;
use crate::deployment::DeploymentManager;
use crate::platform::{Membership, Transport, VoiceProvisioner};
use crate::queue::HotDropQueue;
use crate::shutdown::Shutdown;
use crate::{db, settings, Services};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub struct App {
    pub deployments: Arc<DeploymentManager>,
    pub queue: HotDropQueue,
    pub shutdown: Shutdown,
}

/// Brings the whole core up: logging, store, sweep loop and queue actor.
/// Calling this twice in one process is a hard error, not a second instance.
pub async fn init(
    config: Config,
    transport: Arc<dyn Transport>,
    membership: Arc<dyn Membership>,
    voice: Arc<dyn VoiceProvisioner>,
) -> anyhow::Result<App> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        anyhow::bail!("hotdrop is already initialized in this process");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pool = db::connect(&config.database_url).await?;
    let services = Services {
        pool: pool.clone(),
        config: Arc::new(config),
        transport,
        membership,
        voice,
    };

    let shutdown = Shutdown::new();

    let deployments = Arc::new(DeploymentManager::new(services.clone()));
    tokio::spawn(Sweep::new(services.clone(), shutdown.token()).run());

    let interval =
        settings::get_deployment_interval(&pool, &services.config.guild_id).await?;
    let queue = HotDropQueue::new(services, interval, shutdown.token());

    info!("hotdrop core is up");
    Ok(App {
        deployments,
        queue,
        shutdown,
    })
}
