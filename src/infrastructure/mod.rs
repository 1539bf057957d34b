//! Infrastructure - everything around the socket itself
//!
//! - Configuration management
//! - Logging
//! - Metrics

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{ClientConfig, Config, ConfigError, LoggingConfig};
pub use logging::init_logging;
pub use metrics::{ClientMetrics, MetricsSnapshot};
