//! ESL Bridge
//!
//! Bridges telephony event sockets to pub/sub channels:
//! - ConnectionSupervisor: per-switch reconnect supervision and health counters
//! - EventRouter: classifies events and derives the published messages
//! - CallStore: bounded, TTL-pruned call correlation table
//! - PubSubHub: in-process channel fanout behind the Publisher trait
//! - BridgeRuntime: single owner of bridge state, sweeps and connection signals
//! - API: WebSocket pub/sub endpoint, health and monitoring routes

pub mod error;
pub mod headers;
pub mod connection;
pub mod supervisor;
pub mod call_store;
pub mod publish;
pub mod router;
pub mod runtime;
pub mod api;

pub use error::BridgeError;
pub use headers::{normalize, EventHeaders};
pub use connection::{SignalKind, SourceSignal};
pub use supervisor::{ConnectionRecord, ConnectionSupervisor, ReconnectPolicy};
pub use call_store::{CallStore, CallStoreConfig, EvictionPolicy, MaintenanceReport};
pub use publish::{agent_channel, agents_channel, HubMessage, HubStats, PubSubHub, Publisher};
pub use router::{DispatchOutcome, EventCategory, EventRouter};
pub use runtime::{BridgeRuntime, BridgeState, RuntimeConfig};
pub use api::{create_router, AppState};

pub type Result<T> = std::result::Result<T, BridgeError>;
