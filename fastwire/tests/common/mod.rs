#![allow(dead_code)]

use fastwire::executor::SerialQueue;
use fastwire::net::{HandlerContext, Processor, ProcessorState, Transport};
use fastwire::reactor::{Direction, ReadyCallback, Registrar, Registration};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

static NEXT_FD: AtomicI32 = AtomicI32::new(10_000);

enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

#[derive(Default)]
struct TransportState {
    inbound: VecDeque<ReadStep>,
    written: Vec<u8>,

    /// Bytes the next writes may take; `None` takes everything.
    write_budget: Option<usize>,
    write_error: Option<io::ErrorKind>,
}

/// In-memory transport with scripted reads and a write budget.
///
/// Clones share state, so a test keeps one clone to inspect what the
/// handler did with the other.
#[derive(Clone)]
pub struct MockTransport {
    fd: RawFd,
    state: Arc<Mutex<TransportState>>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
    read_calls: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            fd: NEXT_FD.fetch_add(1, Ordering::Relaxed),
            state: Arc::default(),
            closed: Arc::default(),
            close_calls: Arc::default(),
            read_calls: Arc::default(),
        }
    }

    pub fn push_read(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.inbound.push_back(ReadStep::Data(bytes.to_vec()));
    }

    pub fn push_eof(&self) {
        self.state.lock().unwrap().inbound.push_back(ReadStep::Eof);
    }

    pub fn push_read_error(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().inbound.push_back(ReadStep::Error(kind));
    }

    /// Lets the next writes take at most `bytes` in total.
    pub fn grant(&self, bytes: usize) {
        self.state.lock().unwrap().write_budget = Some(bytes);
    }

    pub fn unlimited(&self) {
        self.state.lock().unwrap().write_budget = None;
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().write_error = Some(kind);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        match state.inbound.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Eof) => {
                state.inbound.push_front(ReadStep::Eof);
                Ok(0)
            }
            Some(ReadStep::Error(kind)) => Err(kind.into()),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);

                if n < data.len() {
                    state.inbound.push_front(ReadStep::Data(data.split_off(n)));
                }

                Ok(n)
            }
        }
    }

    fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        let mut state = self.state.lock().unwrap();

        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }

        let n = match state.write_budget {
            None => buffer.len(),
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buffer.len()),
        };

        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= n;
        }

        state.written.extend_from_slice(&buffer[..n]);
        Ok(n)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn fd(&self) -> RawFd {
        self.fd
    }

    fn remote_hostname(&self) -> Option<String> {
        Some("mock.peer".to_string())
    }
}

struct Entry {
    fd: RawFd,
    direction: Direction,
    callback: Option<ReadyCallback>,
    armed: bool,
}

#[derive(Default)]
struct RegistrarState {
    next_token: usize,
    sources: HashMap<usize, Entry>,
    cancellations: Vec<Box<dyn FnOnce() + Send>>,
}

/// Registrar that records registrations and fires them on demand.
///
/// Cancellations stay pending until
/// [`complete_cancellations`](Self::complete_cancellations), the way the
/// reactor completes them on its own thread.
#[derive(Default)]
pub struct MockRegistrar {
    state: Mutex<RegistrarState>,
}

impl MockRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, fd: RawFd, direction: Direction) -> Option<usize> {
        let state = self.state.lock().unwrap();

        state
            .sources
            .iter()
            .find(|(_, e)| e.fd == fd && e.direction == direction)
            .map(|(token, _)| *token)
    }

    pub fn has_read(&self, fd: RawFd) -> bool {
        self.find(fd, Direction::Read).is_some()
    }

    pub fn has_write(&self, fd: RawFd) -> bool {
        self.find(fd, Direction::Write).is_some()
    }

    fn armed(&self, fd: RawFd, direction: Direction) -> bool {
        let Some(token) = self.find(fd, direction) else {
            return false;
        };

        self.state.lock().unwrap().sources[&token].armed
    }

    pub fn read_armed(&self, fd: RawFd) -> bool {
        self.armed(fd, Direction::Read)
    }

    pub fn write_armed(&self, fd: RawFd) -> bool {
        self.armed(fd, Direction::Write)
    }

    /// Runs the callback of `fd`'s registration in `direction`.
    ///
    /// Returns `false` if there is none or it is disarmed. A write
    /// registration disarms as it fires.
    fn fire(&self, fd: RawFd, direction: Direction) -> bool {
        let Some(token) = self.find(fd, direction) else {
            return false;
        };

        let mut callback = {
            let mut state = self.state.lock().unwrap();
            let entry = state.sources.get_mut(&token).unwrap();

            if !entry.armed {
                return false;
            }

            if direction == Direction::Write {
                entry.armed = false;
            }

            entry.callback.take().unwrap()
        };

        callback();

        if let Some(entry) = self.state.lock().unwrap().sources.get_mut(&token) {
            entry.callback = Some(callback);
        }

        true
    }

    pub fn fire_read(&self, fd: RawFd) -> bool {
        self.fire(fd, Direction::Read)
    }

    pub fn fire_write(&self, fd: RawFd) -> bool {
        self.fire(fd, Direction::Write)
    }

    pub fn pending_cancellations(&self) -> usize {
        self.state.lock().unwrap().cancellations.len()
    }

    /// Runs every cancellation completion requested so far.
    pub fn complete_cancellations(&self) {
        let completions = std::mem::take(&mut self.state.lock().unwrap().cancellations);

        for on_cancelled in completions {
            on_cancelled();
        }
    }

    fn register(&self, fd: RawFd, direction: Direction, callback: ReadyCallback) -> Registration {
        let mut state = self.state.lock().unwrap();

        let token = state.next_token;
        state.next_token += 1;

        state.sources.insert(
            token,
            Entry {
                fd,
                direction,
                callback: Some(callback),
                armed: true,
            },
        );

        Registration::new(token, fd, direction)
    }
}

impl Registrar for MockRegistrar {
    fn register_read(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<Registration> {
        Ok(self.register(fd, Direction::Read, callback))
    }

    fn register_write(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<Registration> {
        Ok(self.register(fd, Direction::Write, callback))
    }

    fn rearm(&self, registration: Registration) {
        if let Some(entry) = self
            .state
            .lock()
            .unwrap()
            .sources
            .get_mut(&registration.token())
        {
            entry.armed = true;
        }
    }

    fn disarm(&self, registration: Registration) {
        if let Some(entry) = self
            .state
            .lock()
            .unwrap()
            .sources
            .get_mut(&registration.token())
        {
            entry.armed = false;
        }
    }

    fn cancel(&self, registration: Registration, on_cancelled: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().unwrap();

        state.sources.remove(&registration.token());
        state.cancellations.push(on_cancelled);
    }
}

/// Processor that records every batch it is handed.
pub struct RecordingProcessor {
    pub batches: Arc<Mutex<Vec<Vec<u8>>>>,
    pub closed: Arc<AtomicUsize>,
    state: ProcessorState,
}

impl RecordingProcessor {
    pub fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>, Arc<AtomicUsize>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));

        let processor = Self {
            batches: batches.clone(),
            closed: closed.clone(),
            state: ProcessorState::default(),
        };

        (processor, batches, closed)
    }
}

impl Processor for RecordingProcessor {
    fn process(&mut self, bytes: &[u8]) {
        self.batches.lock().unwrap().push(bytes.to_vec());
    }

    fn state(&self) -> &ProcessorState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProcessorState {
        &mut self.state
    }

    fn closed(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A writer queue and mock registrar wired into a handler context.
pub struct Harness {
    pub writer: SerialQueue,
    pub registrar: Arc<MockRegistrar>,
    pub context: HandlerContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_read_chunk(4096)
    }

    pub fn with_read_chunk(read_chunk_size: usize) -> Self {
        init_logger();

        let writer = SerialQueue::new("test-writer").unwrap();
        let registrar = Arc::new(MockRegistrar::new());

        let context = HandlerContext {
            registrar: registrar.clone(),
            writer: writer.handle(),
            read_chunk_size,
            keep_alive: Duration::from_secs(5),
        };

        Self {
            writer,
            registrar,
            context,
        }
    }

    /// Waits until every job queued on the writer so far has run.
    pub fn settle(&self) {
        self.writer.handle().sync();
    }
}
