//! Request/response correlation state machine.
//!
//! A [`Session`] tracks one outstanding request from the requester's side.
//! Responder messages arrive as [`SessionEvent`]s and move the session
//! through its states; data chunks are merged into the accumulation buffer
//! by node id, then timestamp value.
//!
//! ```text
//! Pending -> Accepted -> Started -> Receiving* -> Done
//!    \__________\___________\_________\______-> Cancelled | Failed
//! ```

use crate::tree::Response;

/// Where a session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Request sent, no answer yet
    Pending,
    /// Responder queued the work
    Accepted {
        /// Queue depth reported by the responder
        queued: Option<u32>,
    },
    /// Responder began processing
    Started,
    /// At least one data chunk arrived
    Receiving {
        /// Chunks received so far
        chunks: usize,
    },
    /// All data delivered
    Done,
    /// Requester withdrew the request
    Cancelled,
    /// Responder reported an error, or the session timed out
    Failed(String),
}

impl SessionState {
    /// Whether no further event can change this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Cancelled | SessionState::Failed(_)
        )
    }

    /// Short name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Accepted { .. } => "accepted",
            SessionState::Started => "started",
            SessionState::Receiving { .. } => "receiving",
            SessionState::Done => "done",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed(_) => "failed",
        }
    }
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Responder queued the request
    Accepted {
        /// Reported queue depth
        queued: Option<u32>,
    },
    /// Responder started the readout
    Started,
    /// One chunk of data
    Fields(Response),
    /// Final answer, possibly carrying the last data
    Done(Response),
    /// Responder failure or local timeout
    Error(String),
    /// Requester cancellation
    Cancel,
}

impl SessionEvent {
    /// Short name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Accepted { .. } => "accepted",
            SessionEvent::Started => "started",
            SessionEvent::Fields(_) => "fields",
            SessionEvent::Done(_) => "done",
            SessionEvent::Error(_) => "error",
            SessionEvent::Cancel => "cancel",
        }
    }
}

/// Requester-side correlation record for one request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    request_id: String,
    state: SessionState,
    accumulated: Response,
}

impl Session {
    /// Open a session in [`SessionState::Pending`].
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        Self {
            accumulated: Response::new(request_id.clone()),
            request_id,
            state: SessionState::Pending,
        }
    }

    /// The correlated request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Data received so far.
    #[must_use]
    pub fn accumulated(&self) -> &Response {
        &self.accumulated
    }

    /// Take the accumulated data, leaving the buffer empty.
    pub fn take_accumulated(&mut self) -> Response {
        std::mem::replace(&mut self.accumulated, Response::new(self.request_id.clone()))
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyTerminal`] if the session already
    /// finished, or [`SessionError::IllegalTransition`] if the event cannot
    /// follow the current state. The session is unchanged on error.
    pub fn apply(&mut self, event: SessionEvent) -> Result<&SessionState, SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::AlreadyTerminal(self.request_id.clone()));
        }

        let next = match (&self.state, event) {
            (SessionState::Pending, SessionEvent::Accepted { queued }) => {
                SessionState::Accepted { queued }
            }
            (SessionState::Pending | SessionState::Accepted { .. }, SessionEvent::Started) => {
                SessionState::Started
            }
            (state, SessionEvent::Fields(chunk)) if state.accepts_data() => {
                let chunks = match state {
                    SessionState::Receiving { chunks } => chunks + 1,
                    _ => 1,
                };
                self.accumulated.merge(chunk);
                SessionState::Receiving { chunks }
            }
            (state, SessionEvent::Done(last)) if state.accepts_data() => {
                self.accumulated.merge(last);
                SessionState::Done
            }
            (_, SessionEvent::Error(message)) => {
                self.accumulated = Response::new(self.request_id.clone());
                SessionState::Failed(message)
            }
            (_, SessionEvent::Cancel) => {
                self.accumulated = Response::new(self.request_id.clone());
                SessionState::Cancelled
            }
            (state, event) => {
                return Err(SessionError::IllegalTransition {
                    request_id: self.request_id.clone(),
                    from: state.name(),
                    event: event.name(),
                });
            }
        };

        tracing::debug!(
            request_id = %self.request_id,
            from = self.state.name(),
            to = next.name(),
            "Session transition"
        );
        self.state = next;
        Ok(&self.state)
    }
}

impl SessionState {
    fn accepts_data(&self) -> bool {
        matches!(
            self,
            SessionState::Accepted { .. } | SessionState::Started | SessionState::Receiving { .. }
        )
    }
}

/// Errors raised when driving sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with this request id
    #[error("no session for request '{0}'")]
    NotFound(String),
    /// The session already reached a terminal state
    #[error("session '{0}' already finished")]
    AlreadyTerminal(String),
    /// The event cannot follow the current state
    #[error("session '{request_id}': '{event}' not allowed while {from}")]
    IllegalTransition {
        /// Session id
        request_id: String,
        /// State the session was in
        from: &'static str,
        /// Rejected event
        event: &'static str,
    },
    /// A session with this request id is already open
    #[error("session '{0}' already exists")]
    AlreadyExists(String),
}
