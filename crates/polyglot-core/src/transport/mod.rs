//! Line-framed JSON transport over either child stdio or a broker topic
//! pair. See `trait_def::Transport` for the shared interface.

mod broker;
mod stdio;
mod trait_def;

pub use broker::{poly_topic, node_topic, BrokerClient, InProcessBroker};
pub use trait_def::{Received, Transport, TransportHandle};

pub mod stdio_transport {
    pub use super::stdio::spawn;
}

pub mod broker_transport {
    pub use super::broker::spawn;
}
