//! Poll loop shared by the loader backends
//!
//! Every tick the source is fetched, defaults are applied, the result is diffed
//! against the previous snapshot and any non-empty operation is sent. The send
//! waits for the consumer, so a slow consumer delays the next poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_api::{TargetConfig, TargetOperation};
use gantry_common::ConfigError;

use crate::diff::diff;
use crate::error::Result;
use crate::loader::{LoaderHooks, TargetAction, TargetsDefaults};
use crate::metrics::LoaderMetrics;
use crate::options::LoaderOptions;

/// Where a loader reads its inventory from
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Backend name, used as `loader_type` label
    fn loader_type(&self) -> &'static str;

    /// Read the full current inventory
    async fn fetch(&self) -> Result<HashMap<String, TargetConfig>>;

    /// Release connections held by the source
    async fn close(&self) {}
}

type NamedAction = (String, Arc<dyn TargetAction>);

#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn TargetSource>,
    interval: Duration,
    channel_capacity: usize,
    scope: CancellationToken,
    targets_defaults: Option<TargetsDefaults>,
    on_add: Vec<NamedAction>,
    on_delete: Vec<NamedAction>,
    metrics: Option<&'static LoaderMetrics>,
}

impl Poller {
    /// Resolve options and hooks for `source`. The poller never outlives `scope`.
    pub fn new(
        source: Arc<dyn TargetSource>,
        options: &LoaderOptions,
        default_interval: Duration,
        hooks: LoaderHooks,
        scope: CancellationToken,
    ) -> Result<Self> {
        let resolve = |names: &[String]| -> std::result::Result<Vec<NamedAction>, ConfigError> {
            names
                .iter()
                .map(|name| {
                    hooks
                        .actions
                        .get(name)
                        .map(|action| (name.clone(), action.clone()))
                        .ok_or_else(|| ConfigError::Invalid(format!("unknown action '{}'", name)))
                })
                .collect()
        };
        let on_add = resolve(&options.on_add)?;
        let on_delete = resolve(&options.on_delete)?;

        let metrics = if options.enable_metrics {
            let metrics = LoaderMetrics::global();
            if let Some(registry) = &hooks.registry {
                metrics.register(registry)?;
            }
            Some(metrics)
        } else {
            None
        };

        Ok(Self {
            interval: options.interval_or(default_interval),
            channel_capacity: options.channel_capacity(),
            source,
            scope,
            targets_defaults: hooks.targets_defaults,
            on_add,
            on_delete,
            metrics,
        })
    }

    pub fn loader_type(&self) -> &'static str {
        self.source.loader_type()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the poll loop. The stream ends when `cancel` or the init scope fires.
    pub fn start(&self, cancel: &CancellationToken) -> mpsc::Receiver<TargetOperation> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let poller = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel, tx).await });
        rx
    }

    /// Fetch once and apply defaults
    pub async fn run_once(&self) -> Result<HashMap<String, TargetConfig>> {
        let targets = self.source.fetch().await?;
        Ok(self.apply_defaults(targets))
    }

    fn apply_defaults(
        &self,
        targets: HashMap<String, TargetConfig>,
    ) -> HashMap<String, TargetConfig> {
        targets
            .into_iter()
            .filter_map(|(name, mut target)| {
                target.fill_address();
                if let Some(defaults) = &self.targets_defaults
                    && let Err(e) = defaults(&mut target)
                {
                    warn!(
                        "{} loader: dropping target {}: {}",
                        self.loader_type(),
                        name,
                        e
                    );
                    return None;
                }
                Some((name, target))
            })
            .collect()
    }

    async fn stopped(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = self.scope.cancelled() => {}
            _ = cancel.cancelled() => {}
        }
    }

    async fn run(self, cancel: CancellationToken, tx: mpsc::Sender<TargetOperation>) {
        let loader_type = self.loader_type();
        let mut snapshot: HashMap<String, TargetConfig> = HashMap::new();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{} loader started, polling every {:?}", loader_type, self.interval);

        loop {
            tokio::select! {
                biased;
                _ = self.stopped(&cancel) => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = self.stopped(&cancel) => break,
                fetched = self.run_once() => fetched,
            };
            let mut current = match fetched {
                Ok(targets) => targets,
                Err(e) => {
                    warn!("{} loader: failed to fetch targets: {}", loader_type, e);
                    if let Some(metrics) = self.metrics {
                        metrics.increment_watch_error(loader_type, e.kind());
                    }
                    continue;
                }
            };

            let mut op = diff(&snapshot, &current);
            self.run_add_actions(&mut op, &mut current).await;
            self.run_delete_actions(&op, &snapshot).await;
            snapshot = current;

            if op.is_empty() {
                debug!("{} loader: no changes in {} targets", loader_type, snapshot.len());
                continue;
            }

            info!(
                "{} loader: {} target(s) added, {} deleted",
                loader_type,
                op.add.len(),
                op.del.len()
            );
            let deleted = op.del.len();
            tokio::select! {
                biased;
                _ = self.stopped(&cancel) => break,
                sent = tx.send(op) => {
                    if sent.is_err() {
                        debug!("{} loader: operation receiver dropped", loader_type);
                        break;
                    }
                }
            }

            if let Some(metrics) = self.metrics {
                metrics.set_loaded(loader_type, snapshot.len());
                metrics.set_deleted(loader_type, deleted);
            }
        }

        self.source.close().await;
        info!("{} loader stopped", loader_type);
    }

    /// Run on-add actions; targets whose action fails are held back for the next cycle
    async fn run_add_actions(
        &self,
        op: &mut TargetOperation,
        current: &mut HashMap<String, TargetConfig>,
    ) {
        if self.on_add.is_empty() {
            return;
        }

        let mut kept = Vec::with_capacity(op.add.len());
        for target in op.add.drain(..) {
            let mut failed = false;
            for (name, action) in &self.on_add {
                if let Err(e) = action.run(&target).await {
                    warn!(
                        "{} loader: action {} failed for target {}: {}",
                        self.loader_type(),
                        name,
                        target.name,
                        e
                    );
                    failed = true;
                    break;
                }
            }
            if failed {
                current.remove(&target.name);
            } else {
                kept.push(target);
            }
        }
        op.add = kept;
    }

    async fn run_delete_actions(
        &self,
        op: &TargetOperation,
        previous: &HashMap<String, TargetConfig>,
    ) {
        for name in &op.del {
            let Some(target) = previous.get(name) else {
                continue;
            };
            for (action_name, action) in &self.on_delete {
                if let Err(e) = action.run(target).await {
                    warn!(
                        "{} loader: action {} failed for deleted target {}: {}",
                        self.loader_type(),
                        action_name,
                        name,
                        e
                    );
                }
            }
        }
    }
}
