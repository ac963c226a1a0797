//! # sensorlink agent binary
//!
//! Runs one device on an MQTT broker: answers readouts and control-sets
//! addressed to it and logs the momentary values of configured peers.

use anyhow::Result;
use sensorlink_agent::{Agent, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting sensorlink agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    tracing::info!(
        device_id = %config.device_id,
        store = %config.store_type,
        "Agent initialized"
    );

    let agent = Agent::new(config)?;

    // Run agent
    agent.run().await?;

    Ok(())
}
