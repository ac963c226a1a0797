//! Responder side of the protocol.
//!
//! Every readout request is answered with `accepted`, `started`, then data:
//! chunked history from the [`DeliveryEngine`] for historical requests, a
//! single `done` from the [`MomentarySource`] otherwise. Any failure is
//! reported as exactly one `err`. A `cancel` raises the request's
//! cancellation flag, which delivery honours at its next chunk boundary.

use crate::control::ControlHandler;
use crate::delivery::{DeliveryEngine, Emission, EmissionSink};
use crate::device::{Actuator, MomentarySource};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use dashmap::DashMap;
use sensorlink_core::control::{ControlSet, ControlSetResponse, ParameterError};
use sensorlink_core::request::Request;
use sensorlink_proto::{Envelope, Stanza};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers readout requests and control-set commands.
pub struct Responder {
    transport: Arc<dyn Transport>,
    engine: DeliveryEngine,
    source: Option<Arc<dyn MomentarySource>>,
    control: Option<ControlHandler>,
    sessions: DashMap<String, Arc<AtomicBool>>,
}

impl Responder {
    /// Create a responder serving history from `engine`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, engine: DeliveryEngine) -> Self {
        Self {
            transport,
            engine,
            source: None,
            control: None,
            sessions: DashMap::new(),
        }
    }

    /// Answer momentary requests from `source`.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn MomentarySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Accept control-set commands for `actuator`.
    #[must_use]
    pub fn with_actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.control = Some(ControlHandler::new(actuator));
        self
    }

    /// Number of readouts in progress.
    #[must_use]
    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Handle one inbound stanza addressed to this responder.
    pub async fn handle(&self, stanza: Stanza) {
        match &stanza.envelope {
            Envelope::Request(request) => self.handle_request(&stanza, request).await,
            Envelope::Cancel { id } => {
                self.cancel(id);
            }
            Envelope::ControlSet(command) => self.handle_control(&stanza, command).await,
            other => {
                tracing::debug!(kind = other.kind(), "Responder ignoring stanza");
            }
        }
    }

    /// Raise the cancellation flag of a running readout.
    ///
    /// Returns `false` if no readout with this id is running.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.sessions.get(request_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                tracing::info!(request_id, "Cancel requested");
                true
            }
            None => {
                tracing::debug!(request_id, "Cancel for unknown request ignored");
                false
            }
        }
    }

    async fn handle_request(&self, origin: &Stanza, request: &Request) {
        let request_id = request.id.clone();

        if request.is_historical() {
            if let Err(err) = request.history_window() {
                self.fail(origin, &request_id, &err.to_string()).await;
                return;
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let inserted = match self.sessions.entry(request_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cancelled));
                true
            }
        };
        if !inserted {
            self.fail(origin, &request_id, "request id already in progress")
                .await;
            return;
        }

        let queued = u32::try_from(self.sessions.len().saturating_sub(1)).ok();
        let result = self.serve(origin, request, queued, &cancelled).await;
        self.sessions.remove(&request_id);

        if let Err(message) = result {
            self.fail(origin, &request_id, &message).await;
        }
    }

    async fn serve(
        &self,
        origin: &Stanza,
        request: &Request,
        queued: Option<u32>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<(), String> {
        let id = request.id.clone();
        self.answer(origin, Envelope::Accepted {
            id: id.clone(),
            queued,
        })
        .await
        .map_err(|e| e.to_string())?;
        self.answer(origin, Envelope::Started { id: id.clone() })
            .await
            .map_err(|e| e.to_string())?;

        if request.is_historical() {
            let mut sink = StanzaSink {
                responder: self,
                origin,
                cancelled: Arc::clone(cancelled),
            };
            self.engine
                .deliver(request, &mut sink)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        } else {
            let Some(source) = self.source.as_ref() else {
                return Err("momentary readout not supported".to_string());
            };
            let response = source.read(request).await.map_err(|e| e.to_string())?;
            if cancelled.load(Ordering::SeqCst) {
                tracing::info!(request_id = %id, "Momentary readout cancelled");
                return Ok(());
            }
            self.answer(origin, Envelope::Done(response))
                .await
                .map_err(|e| e.to_string())
        }
    }

    async fn handle_control(&self, origin: &Stanza, command: &ControlSet) {
        let response = match self.control.as_ref() {
            Some(control) => control.handle(command).await,
            None => {
                tracing::warn!(stanza_id = %origin.id, "Control-set received but no actuator configured");
                let variable = command
                    .parameters()
                    .keys()
                    .chain(command.malformed().keys())
                    .next()
                    .unwrap_or_default();
                ControlSetResponse::rejected(
                    command,
                    ParameterError::new(variable, "control not supported"),
                )
            }
        };
        let reply = origin.reply(Envelope::ControlSetResponse(response));
        if let Err(err) = self.transport.send(reply).await {
            tracing::warn!(stanza_id = %origin.id, error = %err, "Failed to answer control-set");
        }
    }

    async fn answer(&self, origin: &Stanza, envelope: Envelope) -> Result<(), TransportError> {
        let mut stanza = Stanza::new(envelope);
        stanza.to.clone_from(&origin.from);
        stanza.from.clone_from(&origin.to);
        self.transport.send(stanza).await
    }

    async fn fail(&self, origin: &Stanza, request_id: &str, message: &str) {
        tracing::warn!(request_id, reason = message, "Readout failed");
        let failure = Envelope::Failure {
            id: request_id.to_string(),
            message: message.to_string(),
        };
        if let Err(err) = self.answer(origin, failure).await {
            tracing::warn!(request_id, error = %err, "Failed to report readout failure");
        }
    }
}

/// Emits delivery output as answers to the originating stanza.
struct StanzaSink<'a> {
    responder: &'a Responder,
    origin: &'a Stanza,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl EmissionSink for StanzaSink<'_> {
    async fn emit(&mut self, emission: Emission) -> Result<(), TransportError> {
        let envelope = match emission {
            Emission::Fields(chunk) => Envelope::Fields(chunk),
            Emission::Done(last) => Envelope::Done(last),
        };
        self.responder.answer(self.origin, envelope).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
