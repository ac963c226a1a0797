//! Agent runtime orchestration.

use crate::config::AgentConfig;
use crate::delivery::DeliveryEngine;
use crate::device::RegisterDevice;
use crate::logger::HistoryLogger;
use crate::persistence::SqliteStore;
use crate::requester::Requester;
use crate::responder::Responder;
use crate::storage::{MemoryStore, StorageAdapter};
use crate::transport::{MqttTransport, Transport};
use anyhow::{Context, Result};
use sensorlink_proto::{Envelope, Stanza, TopicScheme};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Routes inbound stanzas to the responder or the requester.
///
/// Requests, cancels and control-sets run on their own task so a cancel can
/// reach a delivery in progress. Answers are applied inline, in arrival
/// order, so chunks merge in the order they were sent.
pub struct Dispatcher {
    responder: Arc<Responder>,
    requester: Arc<Requester>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(responder: Arc<Responder>, requester: Arc<Requester>) -> Self {
        Self {
            responder,
            requester,
        }
    }

    /// Requester half.
    #[must_use]
    pub fn requester(&self) -> &Arc<Requester> {
        &self.requester
    }

    /// Responder half.
    #[must_use]
    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    /// Route one stanza.
    pub fn dispatch(&self, stanza: Stanza) {
        match &stanza.envelope {
            Envelope::Request(_) | Envelope::Cancel { .. } | Envelope::ControlSet(_) => {
                let responder = Arc::clone(&self.responder);
                tokio::spawn(async move {
                    responder.handle(stanza).await;
                });
            }
            _ => self.requester.handle_response(stanza),
        }
    }

    /// Dispatch everything arriving on `inbox` until it closes.
    pub async fn serve(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Stanza>) {
        while let Some(stanza) = inbox.recv().await {
            self.dispatch(stanza);
        }
        tracing::debug!("Inbox closed");
    }
}

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    storage: Arc<dyn StorageAdapter>,
    device: Arc<RegisterDevice>,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let storage: Arc<dyn StorageAdapter> = if config.store_type == "sqlite" {
            Arc::new(SqliteStore::open(&config.db_path).context("Failed to open SQLite database")?)
        } else {
            Arc::new(MemoryStore::new())
        };

        let device = RegisterDevice::from_config(config.device_id.as_str(), &config.registers)
            .context("Invalid register configuration")?;

        Ok(Self {
            config,
            storage,
            device: Arc::new(device),
        })
    }

    /// Storage used for history.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Wire responder and requester onto a transport.
    #[must_use]
    pub fn dispatcher(&self, transport: Arc<dyn Transport>) -> Arc<Dispatcher> {
        let engine = DeliveryEngine::new(Arc::clone(&self.storage), self.config.engine);
        let responder = Responder::new(Arc::clone(&transport), engine)
            .with_source(self.device.clone())
            .with_actuator(self.device.clone());
        let requester = Requester::new(transport);
        Arc::new(Dispatcher::new(Arc::new(responder), Arc::new(requester)))
    }

    /// Run the agent's main loop.
    ///
    /// # Errors
    ///
    /// Returns error if any component fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!(device_id = %self.config.device_id, "Starting agent runtime");

        let topic_scheme = TopicScheme::new(&self.config.tenant);
        let (transport, mut eventloop) = MqttTransport::new(
            &self.config.mqtt_broker,
            &self.config.device_id,
            topic_scheme.clone(),
        )
        .context("Failed to create MQTT transport")?;
        transport
            .subscribe_inbox()
            .await
            .context("Failed to subscribe to inbox")?;

        let dispatcher = self.dispatcher(Arc::new(transport));
        let requester = Arc::clone(dispatcher.requester());
        let logger = HistoryLogger::new(Arc::clone(dispatcher.requester()), Arc::clone(&self.storage));
        let peers = Arc::new(self.config.peers.clone());

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut expiry = tokio::time::interval(self.config.engine.session_timeout);

        tracing::info!(
            peers = peers.len(),
            "Agent running, press Ctrl+C to stop"
        );

        // Main event loop
        loop {
            tokio::select! {
                // Handle MQTT events
                event = eventloop.poll() => {
                    match event {
                        Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                            tracing::debug!(
                                topic = %publish.topic,
                                payload_len = publish.payload.len(),
                                "Received stanza"
                            );
                            if topic_scheme.parse(&publish.topic).as_deref() != Some(self.config.device_id.as_str()) {
                                tracing::debug!(topic = %publish.topic, "Ignoring foreign topic");
                                continue;
                            }

                            match Stanza::from_cbor(&publish.payload) {
                                Ok(stanza) => dispatcher.dispatch(stanza),
                                Err(err) => {
                                    tracing::warn!(error = %err, "Failed to decode stanza");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "MQTT error");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }

                // Poll peers for the history log
                _ = poll.tick(), if !peers.is_empty() => {
                    let logger = logger.clone();
                    let peers = Arc::clone(&peers);
                    tokio::spawn(async move {
                        logger.poll_all(&peers).await;
                    });
                }

                // Fail sessions and control-sets whose responder went quiet
                _ = expiry.tick() => {
                    requester.expire_idle(self.config.engine.session_timeout);
                }

                // Handle shutdown
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        tracing::info!("Agent stopped");
        Ok(())
    }
}
