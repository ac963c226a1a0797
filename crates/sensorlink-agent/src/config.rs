//! Agent configuration.

use anyhow::{bail, Context, Result};
use sensorlink_core::control::ParameterType;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Limits of the history delivery engine and session bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Largest number of samples one historical request may return
    pub max_history_records: usize,
    /// Samples per emitted chunk
    pub chunk_size: usize,
    /// Idle time after which an open session is failed
    #[serde(rename = "session_timeout_secs", with = "secs")]
    pub session_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_history_records: 5000,
            chunk_size: 100,
            session_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineOptions {
    /// Check that the limits are usable.
    ///
    /// # Errors
    ///
    /// Returns error if the quota, the chunk size or the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_history_records == 0 {
            bail!("max_history_records must be greater than zero");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.session_timeout.is_zero() {
            bail!("session_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// A peer whose momentary values are logged into local storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    /// Peer device address
    pub device: String,
    /// Fields to read; empty reads everything
    #[serde(default)]
    pub fields: Vec<String>,
}

/// A writable register exposed by the local device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterConfig {
    /// Node the register belongs to; `None` for the device itself
    #[serde(default)]
    pub node: Option<String>,
    /// Register name
    pub name: String,
    /// Parameter type code (`b`, `db`, `i`, ...)
    #[serde(rename = "type")]
    pub type_code: String,
    /// Initial value
    pub value: String,
    /// Enumeration domain of an enum register
    #[serde(default)]
    pub enum_type: Option<String>,
}

impl RegisterConfig {
    /// Resolve the declared type code.
    ///
    /// # Errors
    ///
    /// Returns error if the code is not a parameter type.
    pub fn kind(&self) -> Result<ParameterType> {
        ParameterType::from_code(&self.type_code)
            .with_context(|| format!("Invalid type for register '{}'", self.name))
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Address of this device
    pub device_id: String,

    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Tenant identifier for the topic scheme
    pub tenant: String,

    /// Persistence type: "sqlite" or "memory"
    pub store_type: String,

    /// Database path (for SQLite)
    pub db_path: PathBuf,

    /// Delivery limits and session timeout
    pub engine: EngineOptions,

    /// Peers to poll for the history log
    pub peers: Vec<PeerConfig>,

    /// Interval between peer polls
    pub poll_interval: Duration,

    /// Writable registers of the local device
    pub registers: Vec<RegisterConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "sensorlink-agent".to_string(),
            mqtt_broker: "tcp://localhost:1883".to_string(),
            tenant: "default".to_string(),
            store_type: "sqlite".to_string(),
            db_path: PathBuf::from("./sensorlink.db"),
            engine: EngineOptions::default(),
            peers: Vec::new(),
            poll_interval: Duration::from_secs(60),
            registers: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SENSORLINK_DEVICE_ID`: Address of this device
    /// - `SENSORLINK_MQTT_BROKER`: MQTT broker URL
    /// - `SENSORLINK_TENANT`: Tenant identifier
    /// - `SENSORLINK_STORE`: "sqlite" or "memory"
    /// - `SENSORLINK_DB_PATH`: SQLite database path
    /// - `SENSORLINK_MAX_HISTORY_RECORDS`, `SENSORLINK_CHUNK_SIZE`,
    ///   `SENSORLINK_SESSION_TIMEOUT_SECS`: engine limits
    /// - `SENSORLINK_ENGINE`: engine limits as one JSON object
    /// - `SENSORLINK_PEERS`: JSON list of `{ "device": .., "fields": [..] }`
    /// - `SENSORLINK_POLL_INTERVAL_SECS`: peer poll interval
    /// - `SENSORLINK_REGISTERS`: JSON list of writable registers
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the engine limits are
    /// invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AgentConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("SENSORLINK_DEVICE_ID") {
            config.device_id = id;
        }

        if let Some(mqtt) = lookup("SENSORLINK_MQTT_BROKER") {
            config.mqtt_broker = mqtt;
        }

        if let Some(tenant) = lookup("SENSORLINK_TENANT") {
            config.tenant = tenant;
        }

        if let Some(store_type) = lookup("SENSORLINK_STORE") {
            match store_type.as_str() {
                "sqlite" | "memory" => config.store_type = store_type,
                other => bail!("Invalid SENSORLINK_STORE '{other}'"),
            }
        }

        if let Some(db_path) = lookup("SENSORLINK_DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }

        if let Some(engine_json) = lookup("SENSORLINK_ENGINE") {
            config.engine =
                serde_json::from_str(&engine_json).context("Invalid SENSORLINK_ENGINE JSON")?;
        }

        if let Some(max) = lookup("SENSORLINK_MAX_HISTORY_RECORDS") {
            config.engine.max_history_records = max
                .parse()
                .context("Invalid SENSORLINK_MAX_HISTORY_RECORDS")?;
        }

        if let Some(chunk) = lookup("SENSORLINK_CHUNK_SIZE") {
            config.engine.chunk_size = chunk.parse().context("Invalid SENSORLINK_CHUNK_SIZE")?;
        }

        if let Some(secs) = lookup("SENSORLINK_SESSION_TIMEOUT_SECS") {
            config.engine.session_timeout = Duration::from_secs(
                secs.parse()
                    .context("Invalid SENSORLINK_SESSION_TIMEOUT_SECS")?,
            );
        }

        // Parse peers from JSON env var
        if let Some(peers_json) = lookup("SENSORLINK_PEERS") {
            config.peers =
                serde_json::from_str(&peers_json).context("Invalid SENSORLINK_PEERS JSON")?;
        }

        if let Some(secs) = lookup("SENSORLINK_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(
                secs.parse()
                    .context("Invalid SENSORLINK_POLL_INTERVAL_SECS")?,
            );
        }

        if let Some(registers_json) = lookup("SENSORLINK_REGISTERS") {
            config.registers = serde_json::from_str(&registers_json)
                .context("Invalid SENSORLINK_REGISTERS JSON")?;
            for register in &config.registers {
                register.kind()?;
            }
        }

        if config.poll_interval.is_zero() {
            bail!("SENSORLINK_POLL_INTERVAL_SECS must be greater than zero");
        }
        config.engine.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.engine.max_history_records, 5000);
        assert_eq!(config.engine.chunk_size, 100);
        assert_eq!(config.engine.session_timeout, Duration::from_secs(60));
        assert_eq!(config.store_type, "sqlite");
    }

    #[test]
    fn engine_from_json_and_overrides() {
        let config = load(&[
            (
                "SENSORLINK_ENGINE",
                r#"{"max_history_records": 100, "session_timeout_secs": 5}"#,
            ),
            ("SENSORLINK_CHUNK_SIZE", "50"),
        ])
        .unwrap();

        assert_eq!(config.engine.max_history_records, 100);
        assert_eq!(config.engine.chunk_size, 50);
        assert_eq!(config.engine.session_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(load(&[("SENSORLINK_CHUNK_SIZE", "0")]).is_err());
        assert!(load(&[("SENSORLINK_MAX_HISTORY_RECORDS", "zero")]).is_err());
        assert!(load(&[("SENSORLINK_STORE", "postgres")]).is_err());
        assert!(load(&[("SENSORLINK_SESSION_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn peers_and_registers() {
        let config = load(&[
            (
                "SENSORLINK_PEERS",
                r#"[{"device": "pump1@site", "fields": ["temperature"]}, {"device": "meter"}]"#,
            ),
            (
                "SENSORLINK_REGISTERS",
                r#"[{"name": "setpoint", "type": "db", "value": "21.5"}]"#,
            ),
        ])
        .unwrap();

        assert_eq!(config.peers.len(), 2);
        assert!(config.peers[1].fields.is_empty());
        assert_eq!(config.registers[0].kind().unwrap(), ParameterType::Double);
        assert_eq!(config.registers[0].node, None);
    }

    #[test]
    fn register_with_unknown_type_rejected() {
        let err = load(&[(
            "SENSORLINK_REGISTERS",
            r#"[{"name": "setpoint", "type": "q", "value": "21.5"}]"#,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("setpoint"));
    }
}
