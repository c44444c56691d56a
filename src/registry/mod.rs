//! Instance Registry
//!
//! Lifecycle orchestration over the instance store, the name generator
//! that mints short/secure aliases, and operation metrics.

pub mod lifecycle;
pub mod metrics;
pub mod names;

pub use lifecycle::{InstanceRegistry, MonotonicClock, RegistryConfig};
pub use metrics::RegistryMetrics;
pub use names::SecureNameGenerator;
