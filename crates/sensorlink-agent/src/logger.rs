//! History logger.
//!
//! Periodically reads momentary values from peers and appends them to local
//! storage, where the delivery engine later serves them as history.

use crate::config::PeerConfig;
use crate::requester::{RequestError, Requester};
use crate::storage::{Sample, StorageAdapter};
use sensorlink_core::flags::Category;
use sensorlink_core::request::Request;
use sensorlink_core::tree::NodeContainer;
use std::sync::Arc;
use uuid::Uuid;

/// Polls peers and records what they report.
#[derive(Clone)]
pub struct HistoryLogger {
    requester: Arc<Requester>,
    storage: Arc<dyn StorageAdapter>,
}

impl HistoryLogger {
    /// Create a logger storing into `storage`.
    #[must_use]
    pub fn new(requester: Arc<Requester>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self { requester, storage }
    }

    /// Read one peer and store every field it returned.
    ///
    /// Returns the number of samples stored.
    ///
    /// # Errors
    ///
    /// Returns error if the readout fails or storage rejects a sample.
    pub async fn poll_peer(&self, peer: &PeerConfig) -> Result<usize, RequestError> {
        let mut request = Request::new(Uuid::new_v4().to_string());
        request.categories.set(Category::Momentary, true);
        request.set_fields(peer.fields.iter().cloned());

        let handle = self.requester.request(&peer.device, request).await?;
        let response = handle.finish().await?;

        let mut stored = 0;
        for node in response.nodes() {
            for timestamp in node.timestamps().iter() {
                for field in timestamp.fields().iter() {
                    let sample = Sample::from_field(node.id(), timestamp.value(), field);
                    self.storage.append(sample).await?;
                    stored += 1;
                }
            }
        }

        tracing::debug!(peer = %peer.device, count = stored, "Logged peer readout");
        Ok(stored)
    }

    /// Poll every peer once, logging failures.
    pub async fn poll_all(&self, peers: &[PeerConfig]) {
        for peer in peers {
            if let Err(err) = self.poll_peer(peer).await {
                tracing::warn!(peer = %peer.device, error = %err, "Peer poll failed");
            }
        }
    }
}
