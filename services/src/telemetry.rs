use crate::config::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,manna_services=debug";

pub fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if config.is_local() {
        // Local development: Pretty printing
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    } else {
        // Deployed: one JSON object per event
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .try_init()?;
    }

    Ok(())
}
