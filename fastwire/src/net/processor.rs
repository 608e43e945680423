use std::time::Instant;

/// Per-connection state the handler resets when the connection closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorState {
    /// A request is being served; the connection must not be reaped.
    pub in_progress: bool,

    /// When an idle keep-alive connection may be reaped.
    pub keep_alive_until: Option<Instant>,
}

impl ProcessorState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A pluggable protocol processor.
///
/// The [`SocketHandler`](super::SocketHandler) hands it every batch of
/// bytes drained from the transport. `process` runs on the reactor thread
/// and must not block; any reply goes out through the processor's
/// [`ConnectionHandle`](super::ConnectionHandle).
pub trait Processor: Send {
    /// Consumes one batch of inbound bytes, never empty.
    fn process(&mut self, bytes: &[u8]);

    fn state(&self) -> &ProcessorState;

    fn state_mut(&mut self) -> &mut ProcessorState;

    /// Called once after the descriptor has been closed.
    fn closed(&mut self) {}
}
