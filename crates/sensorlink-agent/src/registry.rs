//! Requester-side session registry.
//!
//! Sessions are keyed by request id in a [`DashMap`], so events for one
//! request are applied under that key's shard lock while other requests
//! proceed in parallel. Each session reports progress to its owner through
//! an unbounded channel of [`ReadoutEvent`]s. Terminal sessions are removed.

use dashmap::DashMap;
use sensorlink_core::session::{Session, SessionError, SessionEvent, SessionState};
use sensorlink_core::tree::Response;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Progress report delivered to the owner of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadoutEvent {
    /// Responder queued the request
    Accepted {
        /// Reported queue depth
        queued: Option<u32>,
    },
    /// Responder started the readout
    Started,
    /// A data chunk was merged
    Chunk {
        /// Chunks received so far
        chunks: usize,
    },
    /// All data arrived
    Completed(Response),
    /// Responder error or timeout
    Failed(String),
    /// The request was cancelled locally
    Cancelled,
}

impl ReadoutEvent {
    fn from_state(state: &SessionState, session: &mut Session) -> Option<Self> {
        match state {
            SessionState::Pending => None,
            SessionState::Accepted { queued } => Some(ReadoutEvent::Accepted { queued: *queued }),
            SessionState::Started => Some(ReadoutEvent::Started),
            SessionState::Receiving { chunks } => Some(ReadoutEvent::Chunk { chunks: *chunks }),
            SessionState::Done => Some(ReadoutEvent::Completed(session.take_accumulated())),
            SessionState::Cancelled => Some(ReadoutEvent::Cancelled),
            SessionState::Failed(message) => Some(ReadoutEvent::Failed(message.clone())),
        }
    }
}

#[derive(Debug)]
struct Entry {
    session: Session,
    last_activity: Instant,
    events: mpsc::UnboundedSender<ReadoutEvent>,
}

/// Open requester sessions keyed by request id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Entry>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, returning the receiver of its progress events.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyExists`] if the id is in use.
    pub fn open(
        &self,
        request_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<ReadoutEvent>, SessionError> {
        match self.sessions.entry(request_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SessionError::AlreadyExists(request_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(Entry {
                    session: Session::new(request_id),
                    last_activity: Instant::now(),
                    events: tx,
                });
                tracing::debug!(request_id, "Session opened");
                Ok(rx)
            }
        }
    }

    /// Apply an event to a session and notify its owner.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown ids, or the state
    /// machine's error if the event is not allowed.
    pub fn apply(&self, request_id: &str, event: SessionEvent) -> Result<SessionState, SessionError> {
        let state = {
            let mut entry = self
                .sessions
                .get_mut(request_id)
                .ok_or_else(|| SessionError::NotFound(request_id.to_string()))?;
            let entry = entry.value_mut();

            let state = entry.session.apply(event)?.clone();
            entry.last_activity = Instant::now();

            if let Some(readout) = ReadoutEvent::from_state(&state, &mut entry.session) {
                if entry.events.send(readout).is_err() {
                    tracing::debug!(request_id, "Session owner went away");
                }
            }
            state
        };

        if state.is_terminal() {
            self.sessions.remove(request_id);
            tracing::debug!(request_id, state = state.name(), "Session closed");
        }
        Ok(state)
    }

    /// Cancel a session locally.
    ///
    /// # Errors
    ///
    /// Same as [`SessionRegistry::apply`].
    pub fn cancel(&self, request_id: &str) -> Result<SessionState, SessionError> {
        self.apply(request_id, SessionEvent::Cancel)
    }

    /// Drop a session without notifying its owner.
    pub fn discard(&self, request_id: &str) -> bool {
        self.sessions.remove(request_id).is_some()
    }

    /// Fail and remove every session idle for at least `timeout`.
    ///
    /// Returns the expired request ids.
    pub fn expire_idle(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.sessions.retain(|request_id, entry| {
            if now.duration_since(entry.last_activity) < timeout {
                return true;
            }
            let message = "session timed out".to_string();
            if let Ok(state) = entry.session.apply(SessionEvent::Error(message.clone())) {
                tracing::debug!(request_id = %request_id, state = state.name(), "Session expired");
            }
            let _ = entry.events.send(ReadoutEvent::Failed(message));
            expired.push(request_id.clone());
            false
        });

        if !expired.is_empty() {
            tracing::warn!(count = expired.len(), "Expired idle sessions");
        }
        expired
    }

    /// Current state of a session.
    #[must_use]
    pub fn state(&self, request_id: &str) -> Option<SessionState> {
        self.sessions
            .get(request_id)
            .map(|entry| entry.session.state().clone())
    }

    /// Whether a session is open.
    #[must_use]
    pub fn contains(&self, request_id: &str) -> bool {
        self.sessions.contains_key(request_id)
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
