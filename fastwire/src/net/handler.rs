use super::processor::{Processor, ProcessorState};
use super::transport::Transport;
use crate::executor::QueueHandle;
use crate::reactor::poller::platform::RawFd;
use crate::reactor::{Registrar, Registration};

use log::{debug, trace, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::time::{Duration, Instant};

/// Services shared by every connection of an engine.
#[derive(Clone)]
pub struct HandlerContext {
    /// Readiness registrations for the connection's descriptor.
    pub registrar: Arc<dyn Registrar>,

    /// The single serialized writer context.
    pub writer: QueueHandle,

    /// Size of the scratch buffer each read pulls into.
    pub read_chunk_size: usize,

    /// How long an idle connection stays alive after its last read.
    pub keep_alive: Duration,
}

/// Bytes accepted for write but not yet taken by the kernel.
///
/// Only touched on the writer context, or under its lock while closing.
#[derive(Default)]
struct Outbound {
    backlog: Vec<u8>,

    /// Present while the backlog waits for write readiness.
    registration: Option<Registration>,

    /// Close once the backlog drains.
    preparing_to_close: bool,
}

/// Processor changes requested while the processor was busy.
#[derive(Default)]
struct Pending {
    upgrade: Option<Box<dyn Processor>>,
    closed: bool,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.upgrade.is_none() && !self.closed
    }
}

/// Event-driven handler for one client connection.
///
/// Read readiness runs [`handle_read`](Self::handle_read) on the reactor
/// thread: the transport is drained until it would block and the bytes
/// go to the current [`Processor`] in a single call.
///
/// Writes are funneled through the writer context. A write first tries
/// the transport directly; whatever the kernel does not take is kept in
/// the backlog and flushed on write readiness, in submission order.
///
/// Closing cancels the write registration, then the read registration.
/// The descriptor is closed only once the reactor reports the read
/// cancellation complete.
pub struct SocketHandler {
    transport: Arc<dyn Transport>,
    fd: RawFd,

    registrar: Arc<dyn Registrar>,
    writer: QueueHandle,
    read_chunk_size: usize,
    keep_alive: Duration,

    processor: Mutex<Box<dyn Processor>>,
    pending: Mutex<Pending>,

    outbound: Mutex<Outbound>,
    read_registration: Mutex<Option<Registration>>,

    /// Set once the peer has half-closed; no more reads are attempted.
    peer_closed: AtomicBool,

    /// Set once [`close`](Self::close) has started.
    closing: AtomicBool,

    /// Set once the descriptor has been closed.
    closed: AtomicBool,

    last_activity: Mutex<Instant>,

    this: Weak<SocketHandler>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SocketHandler {
    /// Attaches a connected transport and starts watching it for reads.
    ///
    /// `make_processor` receives the back-reference the processor uses to
    /// write replies and request a close.
    pub fn new<T, F>(
        transport: T,
        context: &HandlerContext,
        make_processor: F,
    ) -> io::Result<Arc<Self>>
    where
        T: Transport + 'static,
        F: FnOnce(ConnectionHandle) -> Box<dyn Processor>,
    {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let fd = transport.fd();

        let handler = Arc::new_cyclic(|this: &Weak<Self>| Self {
            transport,
            fd,
            registrar: context.registrar.clone(),
            writer: context.writer.clone(),
            read_chunk_size: context.read_chunk_size.max(1),
            keep_alive: context.keep_alive,
            processor: Mutex::new(make_processor(ConnectionHandle {
                inner: this.clone(),
            })),
            pending: Mutex::new(Pending::default()),
            outbound: Mutex::new(Outbound::default()),
            read_registration: Mutex::new(None),
            peer_closed: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            this: this.clone(),
        });

        handler.touch();

        {
            // Held across registration so a racing close sees it.
            let mut read_registration = lock(&handler.read_registration);
            let weak = Arc::downgrade(&handler);

            let registration = handler.registrar.register_read(
                fd,
                Box::new(move || {
                    if let Some(handler) = weak.upgrade() {
                        handler.handle_read();
                    }
                }),
            )?;

            *read_registration = Some(registration);
        }

        debug!("fd {fd}: connection attached");
        Ok(handler)
    }

    /// Drains the transport and hands the bytes to the processor.
    ///
    /// Runs on the reactor thread. A zero-byte read means the peer closed
    /// its side and starts a graceful close; other read errors are logged
    /// and left for a later read to settle.
    pub fn handle_read(&self) {
        if self.is_closing() || self.peer_closed.load(Ordering::SeqCst) {
            return;
        }

        let mut chunk = vec![0u8; self.read_chunk_size];
        let mut inbound = Vec::new();
        let mut peer_closed = false;

        loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => inbound.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("fd {}: read failed: {e}", self.fd);
                    break;
                }
            }
        }

        if !inbound.is_empty() {
            trace!("fd {}: read {} bytes", self.fd, inbound.len());

            self.touch();
            self.with_processor(|processor| processor.process(&inbound));
        }

        if peer_closed && !self.peer_closed.swap(true, Ordering::SeqCst) {
            debug!("fd {}: peer closed the connection", self.fd);

            // An EOF stays readable; stop watching until the close lands.
            let registration = *lock(&self.read_registration);
            if let Some(registration) = registration {
                self.registrar.disarm(registration);
            }

            self.prepare_to_close();
        }
    }

    /// Queues `bytes` for transmission.
    ///
    /// Bytes from successive calls reach the peer in call order. An error
    /// is returned only if the connection is already closing or the
    /// writer context has stopped; transport errors met while flushing
    /// are logged.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closing() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closing",
            ));
        }

        if bytes.is_empty() {
            return Ok(());
        }

        let Some(this) = self.this.upgrade() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let bytes = bytes.to_vec();

        if self.writer.execute(move || this.write_now(&bytes)) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer context has shut down",
            ))
        }
    }

    /// Writer context: send directly if nothing is queued, else append.
    fn write_now(&self, bytes: &[u8]) {
        let mut outbound = lock(&self.outbound);

        if self.is_closing() {
            debug!("fd {}: dropping {} bytes written after close", self.fd, bytes.len());
            return;
        }

        if !outbound.backlog.is_empty() {
            outbound.backlog.extend_from_slice(bytes);
            return;
        }

        let written = match write_some(&*self.transport, bytes) {
            Ok(written) => written,
            Err(e) => {
                warn!("fd {}: write failed: {e}", self.fd);
                return;
            }
        };

        trace!("fd {}: wrote {written} of {} bytes", self.fd, bytes.len());

        if written < bytes.len() {
            outbound.backlog.extend_from_slice(&bytes[written..]);
            self.watch_writable(&mut outbound);
        }
    }

    /// Registers for write readiness unless a registration already exists.
    ///
    /// An existing registration is either armed or has fired with a flush
    /// queued behind this job, and that flush rearms it.
    fn watch_writable(&self, outbound: &mut Outbound) {
        if outbound.registration.is_some() {
            return;
        }

        let weak = self.this.clone();

        let callback = Box::new(move || {
            if let Some(handler) = weak.upgrade() {
                let writer = handler.writer.clone();

                if !writer.execute(move || handler.handle_write_helper()) {
                    debug!("writer context stopped, flush dropped");
                }
            }
        });

        match self.registrar.register_write(self.fd, callback) {
            Ok(registration) => {
                debug!(
                    "fd {}: waiting for write readiness with {} bytes queued",
                    self.fd,
                    outbound.backlog.len()
                );
                outbound.registration = Some(registration);
            }
            Err(e) => {
                warn!(
                    "fd {}: cannot watch for write readiness, dropping {} bytes: {e}",
                    self.fd,
                    outbound.backlog.len()
                );
                outbound.backlog.clear();
            }
        }
    }

    /// Flushes as much of the backlog as the transport takes.
    ///
    /// Runs on the writer context when the descriptor is writable. The
    /// write registration is rearmed while bytes remain and cancelled once
    /// the backlog is empty. A pending graceful close completes here.
    pub fn handle_write_helper(&self) {
        let mut outbound = lock(&self.outbound);

        if self.is_closing() {
            return;
        }

        if !outbound.backlog.is_empty() {
            match write_some(&*self.transport, &outbound.backlog) {
                Ok(written) => {
                    trace!(
                        "fd {}: flushed {written} of {} queued bytes",
                        self.fd,
                        outbound.backlog.len()
                    );
                    outbound.backlog.drain(..written);
                }
                Err(e) => {
                    warn!(
                        "fd {}: flush failed, dropping {} queued bytes: {e}",
                        self.fd,
                        outbound.backlog.len()
                    );
                    outbound.backlog.clear();
                }
            }
        }

        if outbound.backlog.is_empty() {
            if let Some(registration) = outbound.registration.take() {
                self.registrar.cancel(registration, Box::new(|| {}));
            }
        } else {
            match outbound.registration {
                Some(registration) => self.registrar.rearm(registration),
                None => self.watch_writable(&mut outbound),
            }
        }

        let close_now = outbound.preparing_to_close && outbound.backlog.is_empty();
        drop(outbound);

        if close_now {
            self.close();
        }
    }

    /// Closes once every byte written so far has been flushed.
    ///
    /// Goes through the writer context so writes submitted before this
    /// call are already in the backlog when it is checked.
    pub fn prepare_to_close(&self) {
        if self.is_closing() {
            return;
        }

        let Some(this) = self.this.upgrade() else {
            return self.close();
        };

        if !self.writer.execute(move || this.prepare_to_close_now()) {
            self.close();
        }
    }

    fn prepare_to_close_now(&self) {
        let mut outbound = lock(&self.outbound);

        if outbound.backlog.is_empty() {
            drop(outbound);
            self.close();
        } else {
            debug!(
                "fd {}: closing after {} queued bytes",
                self.fd,
                outbound.backlog.len()
            );
            outbound.preparing_to_close = true;
        }
    }

    /// Tears the connection down, discarding any backlog.
    ///
    /// Both registrations are cancelled; the descriptor is closed, the
    /// processor state reset and [`Processor::closed`] called once the
    /// read cancellation completes.
    pub fn close(&self) {
        {
            let mut outbound = lock(&self.outbound);

            if self.closing.swap(true, Ordering::AcqRel) {
                return;
            }

            outbound.backlog.clear();
            outbound.preparing_to_close = false;

            if let Some(registration) = outbound.registration.take() {
                self.registrar.cancel(registration, Box::new(|| {}));
            }
        }

        debug!("fd {}: closing", self.fd);

        let transport = self.transport.clone();
        let weak = self.this.clone();

        let on_cancelled = Box::new(move || {
            transport.close();

            if let Some(handler) = weak.upgrade() {
                handler.finish_close();
            }
        });

        match lock(&self.read_registration).take() {
            Some(registration) => self.registrar.cancel(registration, on_cancelled),
            None => on_cancelled(),
        }
    }

    fn finish_close(&self) {
        self.closed.store(true, Ordering::Release);

        lock(&self.pending).closed = true;
        self.try_settle();

        debug!("fd {}: closed", self.fd);
    }

    /// Replaces the processor.
    ///
    /// Takes effect immediately, or right after the current `process`
    /// call returns when invoked from inside it.
    pub fn upgrade(&self, processor: Box<dyn Processor>) {
        debug!("fd {}: switching processor", self.fd);

        lock(&self.pending).upgrade = Some(processor);
        self.try_settle();
    }

    /// Records activity now and pushes the keep-alive deadline forward.
    pub fn touch(&self) {
        let now = Instant::now();
        *lock(&self.last_activity) = now;

        let deadline = now + self.keep_alive;
        self.with_processor(|processor| processor.state_mut().keep_alive_until = Some(deadline));
    }

    /// Whether an idle connection has outlived its keep-alive deadline.
    ///
    /// A connection with a request in progress never expires.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.with_processor(|processor| {
            let state = processor.state();
            !state.in_progress && state.keep_alive_until.is_some_and(|until| now >= until)
        })
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub fn processor_state(&self) -> ProcessorState {
        self.with_processor(|processor| *processor.state())
    }

    /// The descriptor has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A close has started; the descriptor may still be open.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// A graceful close is waiting for the backlog to drain.
    pub fn is_preparing_to_close(&self) -> bool {
        lock(&self.outbound).preparing_to_close
    }

    /// Bytes accepted but not yet taken by the transport.
    pub fn pending_bytes(&self) -> usize {
        lock(&self.outbound).backlog.len()
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn remote_hostname(&self) -> Option<String> {
        self.transport.remote_hostname()
    }

    fn with_processor<R>(&self, f: impl FnOnce(&mut Box<dyn Processor>) -> R) -> R {
        let mut processor = lock(&self.processor);
        let result = f(&mut *processor);
        self.settle(&mut processor);
        drop(processor);

        // A change may have landed between settling and unlocking.
        if !lock(&self.pending).is_empty() {
            self.try_settle();
        }

        result
    }

    fn try_settle(&self) {
        let mut processor = match self.processor.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            // The holder settles before it lets go.
            Err(TryLockError::WouldBlock) => return,
        };

        self.settle(&mut processor);
    }

    fn settle(&self, processor: &mut Box<dyn Processor>) {
        let Pending { upgrade, closed } = std::mem::take(&mut *lock(&self.pending));

        if let Some(next) = upgrade {
            *processor = next;
        }

        if closed {
            processor.state_mut().reset();
            processor.closed();
        }
    }
}

impl Drop for SocketHandler {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writes until the transport would block, returning the bytes taken.
fn write_some(transport: &dyn Transport, bytes: &[u8]) -> io::Result<usize> {
    let mut written = 0;

    while written < bytes.len() {
        match transport.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}

/// Non-owning back-reference from a processor to its handler.
///
/// Every call is a no-op, or an error for [`write`](Self::write), once
/// the handler is gone.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Weak<SocketHandler>,
}

impl ConnectionHandle {
    /// A handle attached to no connection.
    pub fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    fn handler(&self) -> io::Result<Arc<SocketHandler>> {
        self.inner
            .upgrade()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection is gone"))
    }

    /// See [`SocketHandler::write`].
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.handler()?.write(bytes)
    }

    /// See [`SocketHandler::prepare_to_close`].
    pub fn prepare_to_close(&self) {
        if let Ok(handler) = self.handler() {
            handler.prepare_to_close();
        }
    }

    pub fn close(&self) {
        if let Ok(handler) = self.handler() {
            handler.close();
        }
    }

    /// See [`SocketHandler::upgrade`].
    pub fn upgrade(&self, processor: Box<dyn Processor>) {
        if let Ok(handler) = self.handler() {
            handler.upgrade(processor);
        }
    }

    pub fn is_closing(&self) -> bool {
        self.handler().map_or(true, |handler| handler.is_closing())
    }

    pub fn remote_hostname(&self) -> Option<String> {
        self.handler().ok()?.remote_hostname()
    }
}
