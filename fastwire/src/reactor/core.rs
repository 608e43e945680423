use super::command::Command;
use super::event::Event;
use super::poller::{Interest, Poller, Waker};
use super::source::{Direction, ReadyCallback, Registrar, Registration};

use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SendError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};

/// The reactor.
///
/// The reactor runs on a dedicated thread and is the shared readiness
/// notification context for every connection. It is responsible for:
/// - polling OS readiness events,
/// - routing them to the read or write registration of each descriptor,
/// - applying registration changes sent by other threads as [`Command`]s,
/// - running cancellation completions once a descriptor is unwatched.
///
/// Callbacks run inline on this thread, one per ready registration, and
/// must not block.
pub(crate) struct Reactor {
    /// Channel receiving commands from other threads.
    receiver: Receiver<Command>,

    /// Platform-specific poller (epoll, kqueue).
    poller: Poller,

    /// Buffer used to collect events from the poller.
    events: Vec<Event>,

    /// Registered callbacks indexed by token.
    sources: HashMap<usize, Source>,

    /// Per-descriptor view: which tokens watch it and what is armed.
    descriptors: HashMap<RawFd, Descriptor>,

    /// Set once the reactor stops taking commands. Shared with every handle.
    closed: Arc<Mutex<bool>>,
}

struct Source {
    fd: RawFd,
    direction: Direction,
    callback: ReadyCallback,
    armed: bool,
}

#[derive(Default)]
struct Descriptor {
    read: Option<usize>,
    write: Option<usize>,
    interest: Interest,
}

impl Descriptor {
    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

/// A handle used to communicate with the reactor thread.
///
/// Cloning this handle allows any thread to register, rearm and cancel
/// readiness callbacks. Every command wakes the poller so it is applied
/// before the next wait.
#[derive(Clone)]
pub struct ReactorHandle {
    /// Sender side of the command channel.
    sender: Sender<Command>,

    /// Waker used to interrupt the poller.
    waker: Arc<Waker>,

    /// Source of registration tokens, shared by every clone.
    next_token: Arc<AtomicUsize>,

    /// Closed under this lock by the exiting reactor; sends are refused after.
    closed: Arc<Mutex<bool>>,
}

impl ReactorHandle {
    /// Sends a command to the reactor and wakes it.
    ///
    /// Fails once the reactor has stopped. A command that was accepted is
    /// always seen by the reactor, even if it is shutting down.
    pub(crate) fn send(&self, cmd: Command) -> Result<(), SendError<Command>> {
        let closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());

        if *closed {
            return Err(SendError(cmd));
        }

        let result = self.sender.send(cmd);
        drop(closed);

        self.waker.wake();
        result
    }

    /// Asks the reactor thread to exit after the commands already queued.
    pub(crate) fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }

    fn register(
        &self,
        fd: RawFd,
        direction: Direction,
        callback: ReadyCallback,
    ) -> io::Result<Registration> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        self.send(Command::Register {
            token,
            fd,
            direction,
            callback,
        })
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "reactor has shut down"))?;

        Ok(Registration {
            token,
            fd,
            direction,
        })
    }
}

impl Registrar for ReactorHandle {
    fn register_read(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<Registration> {
        self.register(fd, Direction::Read, callback)
    }

    fn register_write(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<Registration> {
        self.register(fd, Direction::Write, callback)
    }

    fn rearm(&self, registration: Registration) {
        let _ = self.send(Command::Rearm {
            token: registration.token,
        });
    }

    fn disarm(&self, registration: Registration) {
        let _ = self.send(Command::Disarm {
            token: registration.token,
        });
    }

    fn cancel(&self, registration: Registration, on_cancelled: Box<dyn FnOnce() + Send>) {
        let cmd = Command::Cancel {
            token: registration.token,
            on_cancelled,
        };

        // With the reactor gone nothing watches the descriptor anymore,
        // so the completion may run right here.
        if let Err(SendError(Command::Cancel { on_cancelled, .. })) = self.send(cmd) {
            on_cancelled();
        }
    }
}

impl Reactor {
    fn new(
        receiver: Receiver<Command>,
        poller: Poller,
        capacity: usize,
        closed: Arc<Mutex<bool>>,
    ) -> Self {
        Self {
            receiver,
            poller,
            events: Vec::with_capacity(capacity),
            sources: HashMap::new(),
            descriptors: HashMap::new(),
            closed,
        }
    }

    /// Starts the reactor thread and returns a handle to it together with
    /// the thread's join handle.
    ///
    /// `capacity` bounds how many events one poll call reports.
    pub(crate) fn start(capacity: usize) -> io::Result<(ReactorHandle, JoinHandle<()>)> {
        let (sender, receiver) = channel();
        let poller = Poller::new(capacity)?;
        let waker = poller.waker();
        let closed = Arc::new(Mutex::new(false));

        let reactor_closed = closed.clone();
        let join = thread::Builder::new()
            .name("fastwire-reactor".into())
            .spawn(move || {
                let mut reactor = Reactor::new(receiver, poller, capacity, reactor_closed);

                if let Err(e) = reactor.run() {
                    error!("reactor stopped: {e}");
                }

                reactor.close();
            })?;

        let handle = ReactorHandle {
            sender,
            waker,
            next_token: Arc::new(AtomicUsize::new(0)),
            closed,
        };

        Ok((handle, join))
    }

    /// Main reactor event loop.
    ///
    /// 1. Apply pending commands
    /// 2. Poll the OS for readiness
    /// 3. Dispatch every event to its registrations
    fn run(&mut self) -> io::Result<()> {
        loop {
            loop {
                match self.receiver.try_recv() {
                    Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => {
                        debug!("reactor shutting down with {} sources", self.sources.len());
                        return Ok(());
                    }
                    Ok(cmd) => self.apply(cmd),
                    Err(TryRecvError::Empty) => break,
                }
            }

            self.poller.poll(&mut self.events, None)?;

            let events = std::mem::take(&mut self.events);
            for event in &events {
                self.dispatch(*event);
            }
            self.events = events;
        }
    }

    /// Stops taking commands and completes every cancellation still queued.
    ///
    /// Completions run after the gate is released so they may call back
    /// into a handle, which then completes inline.
    fn close(&mut self) {
        let mut completions = Vec::new();

        {
            let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
            *closed = true;

            while let Ok(cmd) = self.receiver.try_recv() {
                if let Command::Cancel { on_cancelled, .. } = cmd {
                    completions.push(on_cancelled);
                }
            }
        }

        if !completions.is_empty() {
            debug!("completing {} cancellations left at shutdown", completions.len());
        }

        for on_cancelled in completions {
            on_cancelled();
        }
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                token,
                fd,
                direction,
                callback,
            } => {
                let descriptor = self.descriptors.entry(fd).or_default();

                let slot = match direction {
                    Direction::Read => &mut descriptor.read,
                    Direction::Write => &mut descriptor.write,
                };

                if let Some(previous) = slot.replace(token) {
                    debug!("fd {fd}: {direction:?} registration {previous} replaced by {token}");
                    self.sources.remove(&previous);
                }

                self.sources.insert(
                    token,
                    Source {
                        fd,
                        direction,
                        callback,
                        armed: true,
                    },
                );

                trace!("fd {fd}: registered {direction:?} as {token}");
                self.sync(fd);
            }

            Command::Rearm { token } => {
                if let Some(source) = self.sources.get_mut(&token) {
                    if !source.armed {
                        source.armed = true;
                        let fd = source.fd;
                        self.sync(fd);
                    }
                }
            }

            Command::Disarm { token } => {
                if let Some(source) = self.sources.get_mut(&token) {
                    if source.armed {
                        source.armed = false;
                        let fd = source.fd;
                        self.sync(fd);
                    }
                }
            }

            Command::Cancel {
                token,
                on_cancelled,
            } => {
                if let Some(source) = self.sources.remove(&token) {
                    let fd = source.fd;

                    if let Some(descriptor) = self.descriptors.get_mut(&fd) {
                        match source.direction {
                            Direction::Read if descriptor.read == Some(token) => {
                                descriptor.read = None
                            }
                            Direction::Write if descriptor.write == Some(token) => {
                                descriptor.write = None
                            }
                            _ => {}
                        }
                    }

                    self.sync(fd);

                    if self.descriptors.get(&fd).is_some_and(Descriptor::is_empty) {
                        self.descriptors.remove(&fd);
                    }

                    trace!("fd {fd}: cancelled {:?} registration {token}", source.direction);
                }

                on_cancelled();
            }

            Command::Shutdown => {}
        }
    }

    /// Pushes the armed state of `fd`'s registrations down to the poller.
    fn sync(&mut self, fd: RawFd) {
        let Some(descriptor) = self.descriptors.get_mut(&fd) else {
            return;
        };

        let armed = |token: Option<usize>| {
            token
                .and_then(|t| self.sources.get(&t))
                .is_some_and(|s| s.armed)
        };

        let interest = Interest {
            read: armed(descriptor.read),
            write: armed(descriptor.write),
        };

        if let Err(e) = self.poller.update(fd, descriptor.interest, interest) {
            warn!("fd {fd}: failed to update readiness interest: {e}");
        }

        descriptor.interest = interest;
    }

    fn dispatch(&mut self, event: Event) {
        let fd = event.token as RawFd;

        let Some(descriptor) = self.descriptors.get(&fd) else {
            return;
        };

        let (read, write) = (descriptor.read, descriptor.write);

        if event.readable {
            if let Some(token) = read {
                self.fire(token);
            }
        }

        if event.writable {
            if let Some(token) = write {
                self.fire(token);
            }
        }
    }

    fn fire(&mut self, token: usize) {
        let Some(source) = self.sources.get_mut(&token) else {
            return;
        };

        if !source.armed {
            return;
        }

        if source.direction == Direction::Write {
            source.armed = false;
            let fd = source.fd;
            self.sync(fd);
        }

        if let Some(source) = self.sources.get_mut(&token) {
            (source.callback)();
        }
    }
}
