//! Requester side of the protocol.
//!
//! Sends readout requests and control-set commands, and routes the answers
//! that come back: readout answers into the [`SessionRegistry`], control-set
//! responses to the caller waiting on the command's stanza id.

use crate::registry::{ReadoutEvent, SessionRegistry};
use crate::storage::StorageError;
use crate::transport::{Transport, TransportError};
use dashmap::DashMap;
use sensorlink_core::control::{ControlSet, ControlSetResponse};
use sensorlink_core::request::Request;
use sensorlink_core::session::SessionError;
use sensorlink_core::tree::Response;
use sensorlink_proto::{Envelope, Stanza};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// A control-set command waiting for its answer.
struct PendingControl {
    sent: Instant,
    waiter: oneshot::Sender<ControlSetResponse>,
}

/// Issues requests and correlates their answers.
pub struct Requester {
    transport: Arc<dyn Transport>,
    registry: Arc<SessionRegistry>,
    pending_control: DashMap<String, PendingControl>,
}

impl Requester {
    /// Create a requester sending through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: Arc::new(SessionRegistry::new()),
            pending_control: DashMap::new(),
        }
    }

    /// Sessions of this requester.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Send a readout request to `to`.
    ///
    /// # Errors
    ///
    /// Returns error if the request id is already in use or sending fails;
    /// no session is left open in either case.
    pub async fn request(&self, to: &str, request: Request) -> Result<ReadoutHandle, RequestError> {
        let request_id = request.id.clone();
        let events = self.registry.open(&request_id)?;

        let stanza = Stanza::new(Envelope::Request(request)).addressed(self.transport.address(), to);
        if let Err(err) = self.transport.send(stanza).await {
            self.registry.discard(&request_id);
            return Err(err.into());
        }

        tracing::debug!(request_id = %request_id, to, "Request sent");
        Ok(ReadoutHandle { request_id, events })
    }

    /// Withdraw an open request.
    ///
    /// The local session is cancelled first; the responder stops at its next
    /// chunk boundary.
    ///
    /// # Errors
    ///
    /// Returns error if no such session is open or sending fails.
    pub async fn cancel(&self, to: &str, request_id: &str) -> Result<(), RequestError> {
        self.registry.cancel(request_id)?;

        let stanza = Stanza::new(Envelope::Cancel {
            id: request_id.to_string(),
        })
        .addressed(self.transport.address(), to);
        self.transport.send(stanza).await?;

        tracing::info!(request_id, to, "Request cancelled");
        Ok(())
    }

    /// Send a control-set command to `to`.
    ///
    /// The returned receiver resolves with the responder's answer, or with a
    /// receive error once the command expires unanswered.
    ///
    /// # Errors
    ///
    /// Returns error if sending fails.
    pub async fn control(
        &self,
        to: &str,
        command: ControlSet,
    ) -> Result<oneshot::Receiver<ControlSetResponse>, RequestError> {
        let stanza = Stanza::new(Envelope::ControlSet(command)).addressed(self.transport.address(), to);
        let stanza_id = stanza.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending_control.insert(
            stanza_id.clone(),
            PendingControl {
                sent: Instant::now(),
                waiter: tx,
            },
        );

        if let Err(err) = self.transport.send(stanza).await {
            self.pending_control.remove(&stanza_id);
            return Err(err.into());
        }
        Ok(rx)
    }

    /// Route an answer from a responder.
    pub fn handle_response(&self, stanza: Stanza) {
        let Stanza { id, envelope, .. } = stanza;

        if let Envelope::ControlSetResponse(response) = envelope {
            match self.pending_control.remove(&id) {
                Some((_, pending)) => {
                    let _ = pending.waiter.send(response);
                }
                None => tracing::warn!(stanza_id = %id, "Control-set response for unknown command"),
            }
            return;
        }

        let kind = envelope.kind();
        let Some((request_id, event)) = envelope.into_session_event() else {
            tracing::debug!(kind, "Ignoring non-answer stanza");
            return;
        };

        match self.registry.apply(&request_id, event) {
            Ok(state) => {
                if state.is_terminal() {
                    tracing::info!(request_id = %request_id, state = state.name(), "Session finished");
                }
            }
            Err(SessionError::NotFound(_)) => {
                tracing::warn!(request_id = %request_id, kind, "Answer for unknown session");
            }
            Err(err) => {
                tracing::warn!(request_id = %request_id, kind, error = %err, "Dropped answer");
            }
        }
    }

    /// Number of control-set commands awaiting an answer.
    #[must_use]
    pub fn pending_controls(&self) -> usize {
        self.pending_control.len()
    }

    /// Give up on readouts and control-set commands idle for `timeout`.
    ///
    /// Expired readouts fail through the registry; expired commands drop
    /// their waiter. Returns the number of commands dropped.
    pub fn expire_idle(&self, timeout: Duration) -> usize {
        self.registry.expire_idle(timeout);

        let now = Instant::now();
        let before = self.pending_control.len();
        self.pending_control.retain(|stanza_id, pending| {
            let alive = now.duration_since(pending.sent) < timeout;
            if !alive {
                tracing::warn!(stanza_id = %stanza_id, "Control-set timed out");
            }
            alive
        });
        before.saturating_sub(self.pending_control.len())
    }
}

/// Progress of one outstanding readout.
#[derive(Debug)]
pub struct ReadoutHandle {
    request_id: String,
    events: mpsc::UnboundedReceiver<ReadoutEvent>,
}

impl ReadoutHandle {
    /// The request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Next progress event, `None` once the session is gone.
    pub async fn next(&mut self) -> Option<ReadoutEvent> {
        self.events.recv().await
    }

    /// Wait for the final result.
    ///
    /// # Errors
    ///
    /// Returns error if the readout failed, was cancelled or was dropped.
    pub async fn finish(mut self) -> Result<Response, RequestError> {
        while let Some(event) = self.next().await {
            match event {
                ReadoutEvent::Completed(response) => return Ok(response),
                ReadoutEvent::Failed(message) => return Err(RequestError::Failed(message)),
                ReadoutEvent::Cancelled => return Err(RequestError::Cancelled),
                _ => {}
            }
        }
        Err(RequestError::Closed)
    }
}

/// Errors for requester operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Session bookkeeping rejected the operation
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The stanza could not be sent
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The responder reported an error
    #[error("readout failed: {0}")]
    Failed(String),
    /// The request was cancelled
    #[error("readout cancelled")]
    Cancelled,
    /// The session vanished without a result
    #[error("session closed without a result")]
    Closed,
    /// Received data could not be stored
    #[error(transparent)]
    Storage(#[from] StorageError),
}
