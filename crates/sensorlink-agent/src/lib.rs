//! # sensorlink agent
//!
//! Async runtime of a sensorlink device.
//!
//! ## Architecture
//!
//! The agent plays both protocol roles over one [`transport::Transport`]:
//! 1. **Responder**: answers readout requests from storage or the local
//!    device and applies control-set commands
//! 2. **Requester**: sends requests and tracks their sessions until done,
//!    failed, cancelled or timed out
//! 3. **History logger**: polls peers and appends their values to storage
//!
//! History is served by the [`delivery::DeliveryEngine`] in bounded chunks
//! from any [`storage::StorageAdapter`] (in-memory or `SQLite`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control;
pub mod delivery;
pub mod device;
pub mod logger;
pub mod persistence;
pub mod registry;
pub mod requester;
pub mod responder;
pub mod runtime;
pub mod storage;
pub mod transport;

pub use config::{AgentConfig, EngineOptions, PeerConfig, RegisterConfig};
pub use delivery::{DeliveryEngine, DeliveryError, DeliveryOutcome, Emission, EmissionSink};
pub use device::{Actuator, MomentarySource, RegisterDevice};
pub use registry::{ReadoutEvent, SessionRegistry};
pub use requester::{ReadoutHandle, RequestError, Requester};
pub use responder::Responder;
pub use runtime::{Agent, Dispatcher};
pub use storage::{MemoryStore, Sample, StorageAdapter, StorageError};
pub use transport::{LoopbackNetwork, MqttTransport, Transport, TransportError};
