/// A readiness event reported by the poller.
///
/// `token` is the descriptor the event belongs to. The reactor routes
/// the readable half to the descriptor's read registration and the
/// writable half to its write registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Event {
    pub(crate) token: usize,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}
