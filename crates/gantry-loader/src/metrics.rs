//! Prometheus metrics for target loaders
//!
//! Provides, per loader type:
//! - Number of loaded targets (gauge)
//! - Number of targets deleted by the last operation (gauge)
//! - Failed fetches (counter)

use std::sync::LazyLock;

use prometheus::core::Collector;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

static LOADER_METRICS: LazyLock<LoaderMetrics> = LazyLock::new(LoaderMetrics::new);

/// Loader collectors, shared by every loader in the process
pub struct LoaderMetrics {
    pub loaded_targets: GaugeVec,
    pub deleted_targets: GaugeVec,
    pub watch_errors: CounterVec,
}

impl LoaderMetrics {
    fn new() -> Self {
        let loaded_targets = GaugeVec::new(
            Opts::new(
                "gantry_loader_number_of_loaded_targets",
                "Number of targets currently loaded",
            ),
            &["loader_type"],
        )
        .expect("valid loaded targets metric");

        let deleted_targets = GaugeVec::new(
            Opts::new(
                "gantry_loader_number_of_deleted_targets",
                "Number of targets deleted by the last operation",
            ),
            &["loader_type"],
        )
        .expect("valid deleted targets metric");

        let watch_errors = CounterVec::new(
            Opts::new(
                "gantry_loader_number_of_watch_errors",
                "Number of failed target fetches",
            ),
            &["loader_type", "error"],
        )
        .expect("valid watch errors metric");

        Self {
            loaded_targets,
            deleted_targets,
            watch_errors,
        }
    }

    pub fn global() -> &'static LoaderMetrics {
        &LOADER_METRICS
    }

    /// Register the collectors, tolerating a registry that already has them
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        let collectors: [Box<dyn Collector>; 3] = [
            Box::new(self.loaded_targets.clone()),
            Box::new(self.deleted_targets.clone()),
            Box::new(self.watch_errors.clone()),
        ];
        for collector in collectors {
            match registry.register(collector) {
                Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn set_loaded(&self, loader_type: &str, count: usize) {
        self.loaded_targets
            .with_label_values(&[loader_type])
            .set(count as f64);
    }

    pub fn set_deleted(&self, loader_type: &str, count: usize) {
        self.deleted_targets
            .with_label_values(&[loader_type])
            .set(count as f64);
    }

    pub fn increment_watch_error(&self, loader_type: &str, error: &str) {
        self.watch_errors
            .with_label_values(&[loader_type, error])
            .inc();
    }
}
