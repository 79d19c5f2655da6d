//! The `Transport` abstraction: a line-framed JSON channel to one node
//! server, whether it's reached over a child process's stdio or a broker
//! topic pair. The router never special-cases which one it's talking to.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::Message;
use crate::queue::RequestQueue;

/// One inbound line, decoded into a [`Message`], or a framing error for a
/// line that failed to parse (logged and dropped by the caller:
/// malformed lines don't abort the stream).
#[derive(Debug)]
pub enum Received {
    Message(Message),
    FramingError(TransportError),
}

/// A bidirectional message channel to one node server.
///
/// Implementors hand back an `mpsc::Receiver<Received>` for inbound traffic
/// (stdout lines / broker subscription) and accept outbound sends directly.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to the child, serialized as a single `\n`-terminated
    /// JSON line (or published to the outbound broker topic).
    async fn send(&self, msg: Message) -> Result<(), TransportError>;

    /// True once the transport is known to be unusable (broken pipe, process
    /// gone, or explicitly closed).
    fn is_closed(&self) -> bool;
}

/// Channel handle returned by a transport's spawn function: the `Transport`
/// for sending, and the bounded, priority-aware queue for inbound
/// [`Received`] items (spec §5's per-server request queue).
pub struct TransportHandle {
    pub transport: Box<dyn Transport>,
    pub inbound: RequestQueue,
}
