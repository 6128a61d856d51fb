//! Call-session engine for the Lark messaging client.
//!
//! This crate implements the signaling and negotiation state machine for
//! peer-to-peer audio calls: SDP offer/answer exchange, ICE candidate
//! routing, dual-transport signaling (persistent push channel with a
//! one-way HTTP fallback), mid-call recovery via ICE restart, and the
//! exactly-once call-log record.
//!
//! # Architecture
//!
//! - [`SessionController`]: top-level state machine, one per call
//! - [`CallPhase`] & [`PhaseTransition`]: the session lifecycle
//! - [`ChannelSelector`]: picks and locks the signaling transport
//! - [`Negotiator`]: offer/answer machinery with exactly-once latches
//! - [`CandidateManager`]: ICE candidate gating, queueing and dedup
//! - [`RecoverySupervisor`]: mid-call connectivity recovery
//! - [`MediaStateSynchronizer`]: best-effort mic/speaker broadcast
//! - [`CallLogRecorder`]: one terminal record per session
//! - [`CallRegistry`]: process-wide call admission
//!
//! The media engine, REST client, persistent-channel client and call-log
//! storage are collaborators consumed through traits ([`MediaEngine`],
//! [`RestClient`], [`PushSender`], [`CallLogStore`]); the crate never
//! reimplements them. The UI observes sessions through
//! [`SessionEvent`]s and drives them with the user-action methods.

mod call_log;
mod candidates;
mod channel;
mod config;
mod engine;
mod envelope;
mod error;
mod events;
mod ice_servers;
mod latch;
mod media_sync;
mod negotiator;
mod phase;
mod push;
mod recovery;
mod registry;
mod rest;
mod sched;
mod session;
mod storage;
mod types;
mod worker;

pub use call_log::{CallLogRecorder, resolve_status};
pub use candidates::{CandidateManager, LocalGate};
pub use channel::{ChannelSelector, SignalChannel};
pub use config::CallConfig;
pub use engine::{EngineEvent, MediaEngine};
pub use envelope::{IceCandidate, SdpDescriptor, SdpKind};
pub use error::{CallError, EngineError};
pub use events::{SessionEvent, SessionEvents};
pub use ice_servers::IceServerCache;
pub use media_sync::{MediaStateSynchronizer, RemoteMediaState};
pub use negotiator::Negotiator;
pub use phase::{CallPhase, InvalidTransition, PhaseTransition};
pub use push::{PushEvent, PushSender, PushSignals};
pub use recovery::{RecoverySupervisor, TickVerdict};
pub use registry::CallRegistry;
pub use rest::RestClient;
pub use session::{SessionController, SessionDeps, SessionParams};
pub use storage::{CallLogStore, MemoryCallLogStore};
pub use types::{
    CallDirection, CallLogEntry, CallResponse, CallStatus, ConnectionState, EndReason, IceServer,
    IceState, MediaKind, generate_call_id,
};
pub use worker::SerialWorker;
