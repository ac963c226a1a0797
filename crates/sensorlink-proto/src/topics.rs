//! MQTT topic scheme for device addressing.
//!
//! Topic structure: `sensorlink/v1/{tenant}/{device}/inbox`
//!
//! Every device subscribes to its own inbox; a stanza addressed to a device
//! is published to that device's inbox topic.

use serde::{Deserialize, Serialize};

/// Protocol version for topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Topic scheme configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Tenant identifier
    pub tenant: String,
    /// Topic prefix (default: "sensorlink")
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("default")
    }
}

impl TopicScheme {
    /// Create a new topic scheme with the given tenant.
    #[must_use]
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            prefix: "sensorlink".to_string(),
        }
    }

    fn base(&self) -> String {
        format!("{}/{}/{}", self.prefix, PROTOCOL_VERSION, self.tenant)
    }

    /// Inbox topic of a device.
    #[must_use]
    pub fn inbox(&self, device: &str) -> String {
        format!("{}/{}/inbox", self.base(), device)
    }

    /// Wildcard subscription for every inbox in the tenant.
    #[must_use]
    pub fn tenant_wildcard(&self) -> String {
        format!("{}/+/inbox", self.base())
    }

    /// Extract the device from an inbox topic.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<String> {
        let remainder = topic.strip_prefix(&self.base())?.strip_prefix('/')?;
        let (device, channel) = remainder.split_once('/')?;
        if device.is_empty() || channel != "inbox" {
            return None;
        }
        Some(device.to_string())
    }
}
