//! Log subscriber initialisation.

use crate::{ObservabilityConfig, ObservabilityError};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.log_level`. Fails if a subscriber is already
/// installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| ObservabilityError::Config(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ObservabilityError::TracingInit(e.to_string()))?;

    tracing::info!(
        namespace = %config.namespace,
        json = config.json_logs,
        "Initialized structured tracing"
    );
    Ok(())
}
