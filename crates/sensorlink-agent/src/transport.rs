//! Message transports.
//!
//! A [`Transport`] delivers a [`Stanza`] to the address in its `to` field.
//! Inbound stanzas are handed to the runtime by whoever owns the receiving
//! side: an mpsc channel for [`LoopbackNetwork`], the MQTT event loop for
//! [`MqttTransport`].

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use sensorlink_proto::{Stanza, TopicScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Outbound side of a message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address of this endpoint.
    fn address(&self) -> &str;

    /// Deliver a stanza to `stanza.to`.
    async fn send(&self, stanza: Stanza) -> Result<(), TransportError>;
}

/// In-process network connecting endpoints by address.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    inboxes: Arc<DashMap<String, mpsc::UnboundedSender<Stanza>>>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address, returning its transport and inbox.
    pub fn join(&self, address: &str) -> (ChannelTransport, mpsc::UnboundedReceiver<Stanza>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(address.to_string(), tx);
        (
            ChannelTransport {
                address: address.to_string(),
                network: self.clone(),
            },
            rx,
        )
    }

    /// Remove an address from the network.
    pub fn leave(&self, address: &str) {
        self.inboxes.remove(address);
    }
}

/// Transport of one [`LoopbackNetwork`] endpoint.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    address: String,
    network: LoopbackNetwork,
}

#[async_trait]
impl Transport for ChannelTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, mut stanza: Stanza) -> Result<(), TransportError> {
        let to = stanza.to.clone().ok_or(TransportError::MissingRecipient)?;
        if stanza.from.is_none() {
            stanza.from = Some(self.address.clone());
        }

        let inbox = self
            .network
            .inboxes
            .get(&to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownRecipient(to.clone()))?;

        tracing::debug!(to, kind = stanza.envelope.kind(), "Delivering stanza");
        inbox
            .send(stanza)
            .map_err(|_| TransportError::UnknownRecipient(to))
    }
}

/// Transport publishing CBOR stanzas to per-device MQTT inbox topics.
pub struct MqttTransport {
    client: AsyncClient,
    topic_scheme: TopicScheme,
    address: String,
}

impl MqttTransport {
    /// Create a new MQTT transport for `address`.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(
        mqtt_broker: &str,
        address: &str,
        topic_scheme: TopicScheme,
    ) -> Result<(Self, EventLoop), TransportError> {
        let (host, port) = parse_mqtt_url(mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(format!("sensorlink-{address}"), host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok((
            Self {
                client,
                topic_scheme,
                address: address.to_string(),
            },
            eventloop,
        ))
    }

    /// Subscribe to this endpoint's inbox.
    ///
    /// # Errors
    ///
    /// Returns error if subscription fails.
    pub async fn subscribe_inbox(&self) -> Result<(), TransportError> {
        let topic = self.topic_scheme.inbox(&self.address);

        tracing::info!(topic, "Subscribing to inbox");

        self.client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        Ok(())
    }

    /// Topic scheme used by this transport.
    #[must_use]
    pub fn topic_scheme(&self) -> &TopicScheme {
        &self.topic_scheme
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, mut stanza: Stanza) -> Result<(), TransportError> {
        let to = stanza.to.clone().ok_or(TransportError::MissingRecipient)?;
        if stanza.from.is_none() {
            stanza.from = Some(self.address.clone());
        }

        let topic = self.topic_scheme.inbox(&to);
        let payload = stanza
            .to_cbor()
            .map_err(|e| TransportError::Serialize(e.to_string()))?;

        tracing::debug!(
            topic,
            kind = stanza.envelope.kind(),
            payload_len = payload.len(),
            "Publishing stanza"
        );

        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// Parse MQTT URL into host and port.
///
/// # Errors
///
/// Returns error for unsupported schemes, missing hosts or bad ports.
pub fn parse_mqtt_url(input: &str) -> Result<(String, u16), TransportError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| TransportError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(TransportError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            TransportError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(TransportError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The stanza has no recipient
    #[error("stanza has no recipient")]
    MissingRecipient,
    /// No endpoint with this address
    #[error("unknown recipient '{0}'")]
    UnknownRecipient(String),
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_proto::Envelope;

    #[test]
    fn broker_urls() {
        assert_eq!(
            parse_mqtt_url("tcp://broker:1884").unwrap(),
            ("broker".to_string(), 1884)
        );
        assert_eq!(
            parse_mqtt_url("mqtt://broker").unwrap(),
            ("broker".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("localhost:1999").unwrap(),
            ("localhost".to_string(), 1999)
        );
        assert!(parse_mqtt_url("http://broker").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
        assert!(parse_mqtt_url("a:b:c").is_err());
    }

    #[tokio::test]
    async fn loopback_delivers_and_stamps_sender() {
        let network = LoopbackNetwork::new();
        let (alice, _alice_rx) = network.join("alice");
        let (_bob, mut bob_rx) = network.join("bob");

        let mut stanza = Stanza::new(Envelope::Cancel { id: "1".into() });
        stanza.to = Some("bob".to_string());
        alice.send(stanza).await.unwrap();

        let received = bob_rx.recv().await.unwrap();
        assert_eq!(received.from.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn loopback_rejects_unknown_recipients() {
        let network = LoopbackNetwork::new();
        let (alice, _rx) = network.join("alice");

        let stanza = Stanza::new(Envelope::Cancel { id: "1".into() });
        assert_eq!(
            alice.send(stanza.clone()).await,
            Err(TransportError::MissingRecipient)
        );

        let mut stanza = stanza;
        stanza.to = Some("carol".to_string());
        assert_eq!(
            alice.send(stanza).await,
            Err(TransportError::UnknownRecipient("carol".to_string()))
        );
    }
}
