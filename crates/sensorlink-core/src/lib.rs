//! # sensorlink core
//!
//! Data model of the sensorlink sensor-data and control protocol.
//!
//! This crate provides:
//! - The typed field system and its value grammar
//! - Category and quality flag sets
//! - Node → timestamp → field trees with duplicate-ignoring containers
//! - Readout requests and control-set commands
//! - The requester-side session state machine
//!
//! Nothing here performs I/O; encoding lives in `sensorlink-proto` and the
//! async runtime in `sensorlink-agent`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod field;
pub mod flags;
pub mod keyed;
pub mod request;
pub mod session;
pub mod syntax;
pub mod tree;

pub use control::{
    ControlSet, ControlSetResponse, Parameter, ParameterError, ParameterType, RawParameter,
};
pub use field::{Field, FieldType, FieldValue};
pub use flags::{Category, Flag, FlagSet, Quality};
pub use keyed::{Keyed, KeyedSet};
pub use request::{ProtocolError, Request};
pub use session::{Session, SessionError, SessionEvent, SessionState};
pub use syntax::{DecodeError, Syntax};
pub use tree::{NodeContainer, NodeRef, Response, ResponseNode, Timestamp};
