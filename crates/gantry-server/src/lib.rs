//! Gantry Server - wires the locker and the target loader together
//!
//! The loader decides which targets exist; this instance claims each of them
//! through the locker and advertises the ones it owns as services.

pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gantry_loader::{LoaderHooks, LoaderRegistry};
use gantry_locker::{Locker, LockerRegistry};

pub use config::{AppConfig, Cli};
pub use orchestrator::{Orchestrator, OwnershipConfig};

/// Run until `root` is cancelled or the loader stream ends
pub async fn run(config: AppConfig, root: CancellationToken) -> anyhow::Result<()> {
    let lockers = LockerRegistry::with_defaults();
    let locker: Arc<dyn Locker> = Arc::from(
        lockers
            .create_from_config(&config.locker)
            .await
            .context("failed to initialize locker")?,
    );

    let hooks = LoaderHooks::default().with_registry(prometheus::default_registry().clone());
    let loaders = LoaderRegistry::with_defaults();
    let loader = loaders
        .create_from_config(&root, &config.loader, hooks)
        .await
        .context("failed to initialize target loader")?;
    let ops = loader.start(&root)?;

    info!(
        "Instance {} coordinating targets under {}",
        config.instance_name, config.lock_prefix
    );
    Orchestrator::new(locker, config.ownership(), root)
        .run(ops)
        .await
        .context("failed to release targets on shutdown")
}
