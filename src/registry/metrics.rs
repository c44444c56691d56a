//! Registry metrics

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus collectors for registry operations
#[derive(Clone)]
pub struct RegistryMetrics {
    /// Operations by name and outcome (`ok`, `not_found`, `error`)
    pub operations: IntCounterVec,
    /// Store calls that failed transiently
    pub store_errors: IntCounterVec,
    /// Players seen in the last membership transform, per process
    pub last_player_total: IntGauge,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        let operations = IntCounterVec::new(
            Opts::new(
                "instance_registry_operations_total",
                "Registry operations by outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("static metric definition");

        let store_errors = IntCounterVec::new(
            Opts::new(
                "instance_registry_store_errors_total",
                "Store failures by operation",
            ),
            &["operation"],
        )
        .expect("static metric definition");

        let last_player_total = IntGauge::new(
            "instance_registry_last_player_total",
            "Player count reported by the most recent join or leave",
        )
        .expect("static metric definition");

        Self {
            operations,
            store_errors,
            last_player_total,
        }
    }

    /// Register collectors into a prometheus registry
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.operations.clone()))?;
        registry.register(Box::new(self.store_errors.clone()))?;
        registry.register(Box::new(self.last_player_total.clone()))?;
        Ok(())
    }

    /// Count one operation result
    pub fn observe<T>(&self, operation: &str, result: &crate::error::Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) if e.is_not_found() => "not_found",
            Err(e) => {
                if e.is_transient() {
                    self.store_errors.with_label_values(&[operation]).inc();
                }
                "error"
            }
        };
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
    }
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}
