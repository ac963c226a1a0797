//! Protocol messages and their stanza framing.

use crate::codec::{CodecError, WireCodec, NS_CONTROL, NS_SENSOR_DATA};
use crate::element::Element;
use sensorlink_core::control::{ControlSet, ControlSetResponse};
use sensorlink_core::request::Request;
use sensorlink_core::session::SessionEvent;
use sensorlink_core::tree::Response;
use uuid::Uuid;

/// Payload of one stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Readout request
    Request(Request),
    /// Request queued by the responder
    Accepted {
        /// Request id
        id: String,
        /// Queue depth
        queued: Option<u32>,
    },
    /// Readout started
    Started {
        /// Request id
        id: String,
    },
    /// One data chunk
    Fields(Response),
    /// Readout finished, carrying any remaining data
    Done(Response),
    /// Readout failed
    Failure {
        /// Request id
        id: String,
        /// Human-readable reason
        message: String,
    },
    /// Requester withdrew a request
    Cancel {
        /// Request id
        id: String,
    },
    /// Control-set command
    ControlSet(ControlSet),
    /// Answer to a control-set
    ControlSetResponse(ControlSetResponse),
}

impl Envelope {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Request(_) => "request",
            Envelope::Accepted { .. } => "accepted",
            Envelope::Started { .. } => "started",
            Envelope::Fields(_) => "fields",
            Envelope::Done(_) => "done",
            Envelope::Failure { .. } => "failure",
            Envelope::Cancel { .. } => "cancel",
            Envelope::ControlSet(_) => "control-set",
            Envelope::ControlSetResponse(_) => "control-set-response",
        }
    }

    /// The sensor-data request id this envelope refers to.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Envelope::Request(req) => Some(&req.id),
            Envelope::Fields(resp) | Envelope::Done(resp) => Some(&resp.id),
            Envelope::Accepted { id, .. }
            | Envelope::Started { id }
            | Envelope::Failure { id, .. }
            | Envelope::Cancel { id } => Some(id),
            Envelope::ControlSet(_) | Envelope::ControlSetResponse(_) => None,
        }
    }

    /// Convert a responder answer into a requester session event.
    ///
    /// Returns `None` for envelopes that are not answers to a readout.
    #[must_use]
    pub fn into_session_event(self) -> Option<(String, SessionEvent)> {
        match self {
            Envelope::Accepted { id, queued } => Some((id, SessionEvent::Accepted { queued })),
            Envelope::Started { id } => Some((id, SessionEvent::Started)),
            Envelope::Fields(resp) => Some((resp.id.clone(), SessionEvent::Fields(resp))),
            Envelope::Done(resp) => Some((resp.id.clone(), SessionEvent::Done(resp))),
            Envelope::Failure { id, message } => Some((id, SessionEvent::Error(message))),
            _ => None,
        }
    }
}

fn sd(name: &str, id: &str) -> Element {
    Element::new(name)
        .with_namespace(NS_SENSOR_DATA)
        .with_attr("id", id)
}

impl WireCodec for Envelope {
    fn to_element(&self) -> Element {
        match self {
            Envelope::Request(req) => req.to_element(),
            Envelope::Accepted { id, queued } => {
                let mut el = sd("accepted", id);
                if let Some(queued) = queued {
                    el.attrs.insert("queued".to_string(), queued.to_string());
                }
                el
            }
            Envelope::Started { id } => sd("started", id),
            Envelope::Fields(resp) => resp.to_element(),
            Envelope::Done(resp) => {
                let mut el = sd("done", &resp.id);
                if !resp.is_empty() {
                    let mut last = resp.to_element();
                    last.namespace = None;
                    el.push(last);
                }
                el
            }
            Envelope::Failure { id, message } => sd("err", id).with_text(message.as_str()),
            Envelope::Cancel { id } => sd("cancel", id),
            Envelope::ControlSet(set) => set.to_element(),
            Envelope::ControlSetResponse(resp) => resp.to_element(),
        }
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        let namespace = element.namespace.as_deref().unwrap_or_default();
        match (namespace, element.name.as_str()) {
            (NS_SENSOR_DATA, "req") => Ok(Envelope::Request(Request::from_element(element)?)),
            (NS_SENSOR_DATA, "accepted") => {
                let queued = element
                    .attr("queued")
                    .map(|raw| {
                        raw.parse::<u32>()
                            .map_err(|_| element.invalid_attr("queued", raw))
                    })
                    .transpose()?;
                Ok(Envelope::Accepted {
                    id: element.require_attr("id")?.to_string(),
                    queued,
                })
            }
            (NS_SENSOR_DATA, "started") => Ok(Envelope::Started {
                id: element.require_attr("id")?.to_string(),
            }),
            (NS_SENSOR_DATA, "resp") => Ok(Envelope::Fields(Response::from_element(element)?)),
            (NS_SENSOR_DATA, "done") => {
                let id = element.require_attr("id")?;
                let resp = match element.single_child() {
                    Some(last) => {
                        let mut resp = Response::from_element(last)?;
                        resp.id = id.to_string();
                        resp.more = false;
                        resp
                    }
                    None => Response::new(id),
                };
                Ok(Envelope::Done(resp))
            }
            (NS_SENSOR_DATA, "err") => Ok(Envelope::Failure {
                id: element.require_attr("id")?.to_string(),
                message: element.text.clone().unwrap_or_default(),
            }),
            (NS_SENSOR_DATA, "cancel") => Ok(Envelope::Cancel {
                id: element.require_attr("id")?.to_string(),
            }),
            (NS_CONTROL, "set") => Ok(Envelope::ControlSet(ControlSet::from_element(element)?)),
            (NS_CONTROL, "resp") => Ok(Envelope::ControlSetResponse(
                ControlSetResponse::from_element(element)?,
            )),
            (NS_SENSOR_DATA | NS_CONTROL, other) => Err(CodecError::UnexpectedElement {
                expected: "a protocol payload".to_string(),
                found: other.to_string(),
            }),
            (other, _) => Err(CodecError::UnknownNamespace(other.to_string())),
        }
    }
}

/// An addressed message carrying one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    /// Stanza id; a control-set response reuses the id of its command
    pub id: String,
    /// Sender address
    pub from: Option<String>,
    /// Recipient address
    pub to: Option<String>,
    /// Payload
    pub envelope: Envelope,
}

impl Stanza {
    /// Create a stanza with a fresh id.
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: None,
            to: None,
            envelope,
        }
    }

    /// Set sender and recipient, builder style.
    #[must_use]
    pub fn addressed(mut self, from: &str, to: &str) -> Self {
        self.from = Some(from.to_string());
        self.to = Some(to.to_string());
        self
    }

    /// Build the answer to this stanza: same id, addresses swapped.
    #[must_use]
    pub fn reply(&self, envelope: Envelope) -> Self {
        Self {
            id: self.id.clone(),
            from: self.to.clone(),
            to: self.from.clone(),
            envelope,
        }
    }

    /// Encode as a `message` element wrapping the payload.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("message").with_attr("id", self.id.as_str());
        el.set_opt_attr("from", self.from.as_deref());
        el.set_opt_attr("to", self.to.as_deref());
        el.push(self.envelope.to_element());
        el
    }

    /// Decode a `message` element.
    ///
    /// # Errors
    ///
    /// Returns error if the element is not a message with exactly one valid
    /// payload.
    pub fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("message", None)?;
        let payload = element
            .single_child()
            .ok_or_else(|| CodecError::UnexpectedElement {
                expected: "exactly one payload".to_string(),
                found: format!("{} children", element.children.len()),
            })?;

        Ok(Self {
            id: element.require_attr("id")?.to_string(),
            from: element.attr("from").map(ToString::to_string),
            to: element.attr("to").map(ToString::to_string),
            envelope: Envelope::from_element(payload)?,
        })
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        self.to_element().to_cbor()
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not CBOR or not a valid stanza.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_element(&Element::from_cbor(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_core::field::FieldValue;
    use sensorlink_core::tree::NodeContainer;

    fn data(id: &str, more: bool) -> Response {
        let mut resp = Response::new(id);
        resp.more = more;
        resp.add_node("pump1", None, None)
            .unwrap()
            .add_timestamp("2020-01-01T00:00:00")
            .unwrap()
            .add_data("temperature", FieldValue::quantity("20.5", Some("C")).unwrap());
        resp
    }

    fn roundtrip(envelope: Envelope) -> Envelope {
        let stanza = Stanza::new(envelope).addressed("a@site", "b@site");
        let bytes = stanza.to_cbor().unwrap();
        let decoded = Stanza::from_cbor(&bytes).unwrap();
        assert_eq!(decoded.id, stanza.id);
        assert_eq!(decoded.from.as_deref(), Some("a@site"));
        decoded.envelope
    }

    #[test]
    fn lifecycle_envelopes_survive_cbor() {
        let envelopes = vec![
            Envelope::Request(Request::history("7", "a", "b")),
            Envelope::Accepted {
                id: "7".into(),
                queued: Some(3),
            },
            Envelope::Accepted {
                id: "7".into(),
                queued: None,
            },
            Envelope::Started { id: "7".into() },
            Envelope::Fields(data("7", true)),
            Envelope::Done(data("7", false)),
            Envelope::Done(Response::new("7")),
            Envelope::Failure {
                id: "7".into(),
                message: "advanced historical flags not implemented".into(),
            },
            Envelope::Cancel { id: "7".into() },
            Envelope::ControlSet(ControlSet::new()),
            Envelope::ControlSetResponse(ControlSetResponse::new()),
        ];
        for envelope in envelopes {
            assert_eq!(roundtrip(envelope.clone()), envelope);
        }
    }

    #[test]
    fn done_wraps_remaining_data() {
        let el = Envelope::Done(data("7", false)).to_element();
        assert_eq!(el.name, "done");
        assert_eq!(el.children.len(), 1);
        assert_eq!(el.children[0].name, "resp");

        let empty = Envelope::Done(Response::new("7")).to_element();
        assert!(empty.children.is_empty());
    }

    #[test]
    fn reply_swaps_addresses() {
        let stanza = Stanza::new(Envelope::ControlSet(ControlSet::new())).addressed("a", "b");
        let reply = stanza.reply(Envelope::ControlSetResponse(ControlSetResponse::new()));

        assert_eq!(reply.id, stanza.id);
        assert_eq!(reply.from.as_deref(), Some("b"));
        assert_eq!(reply.to.as_deref(), Some("a"));
    }

    #[test]
    fn unknown_payloads_rejected() {
        let el = Element::new("query").with_namespace("jabber:iq:roster");
        assert!(matches!(
            Envelope::from_element(&el),
            Err(CodecError::UnknownNamespace(_))
        ));

        let el = sd("fields", "1");
        assert!(matches!(
            Envelope::from_element(&el),
            Err(CodecError::UnexpectedElement { .. })
        ));

        let mut message = Element::new("message").with_attr("id", "1");
        message.push(sd("cancel", "1"));
        message.push(sd("cancel", "2"));
        assert!(Stanza::from_element(&message).is_err());
    }

    #[test]
    fn bad_queue_depth() {
        let el = sd("accepted", "1").with_attr("queued", "-4");
        assert!(matches!(
            Envelope::from_element(&el),
            Err(CodecError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn session_events() {
        let (id, event) = Envelope::Failure {
            id: "9".into(),
            message: "quota".into(),
        }
        .into_session_event()
        .unwrap();
        assert_eq!(id, "9");
        assert_eq!(event, SessionEvent::Error("quota".into()));

        assert!(Envelope::Cancel { id: "9".into() }
            .into_session_event()
            .is_none());
    }
}
