//! Data model, wire protocol, config persistence and transport for the
//! Polyglot node-server mediator.
//!
//! This crate has no opinion on *how* messages get dispatched (that's
//! `polyglot-router`), how the controller is called (`polyglot-rest`), or
//! how children are spawned (`polyglot-supervisor`); it defines the shared
//! vocabulary those crates build on.

pub mod addressing;
pub mod config;
pub mod error;
pub mod home;
pub mod logging;
pub mod message;
pub mod model;
pub mod queue;
pub mod registry;
pub mod transport;

pub use message::{InboundCommand, ManagerOp, Message, OutboundCommand};
pub use model::{DiagStats, ServerRecord, ServerState, TransportKind};
pub use queue::RequestQueue;
pub use registry::{Registry, ServerHandle};
