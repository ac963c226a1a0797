//! # sensorlink protocol
//!
//! Wire encoding and MQTT topic scheme for sensorlink.
//!
//! ## Messages
//!
//! Every stanza is a `message` element wrapping one payload:
//!
//! - `req`, `accepted`, `started`, `resp`, `done`, `err`, `cancel` in the
//!   sensor-data namespace
//! - `set` and `resp` in the control namespace
//!
//! Element trees are framed as CBOR for transport.
//!
//! ## MQTT Topics
//!
//! Topic scheme: `sensorlink/v1/{tenant}/{device}/inbox`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod element;
pub mod messages;
pub mod topics;

pub use codec::{CodecError, WireCodec, NS_CONTROL, NS_SENSOR_DATA};
pub use element::Element;
pub use messages::{Envelope, Stanza};
pub use topics::TopicScheme;
