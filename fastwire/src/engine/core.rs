use super::EngineBuilder;
use crate::executor::{QueueHandle, SerialQueue, WorkerPool};
use crate::fcgi::FcgiClient;
use crate::net::{ConnectionHandle, HandlerContext, Processor, SocketHandler, Transport};
use crate::reactor::{Reactor, ReactorHandle, Registrar};

use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The execution contexts of a server.
///
/// `Engine` owns:
/// - the reactor thread, which dispatches readiness to connections,
/// - the writer queue, which serializes every outbound write,
/// - the worker pool, which hosts blocking consumers.
///
/// Created at server start. Dropping the engine stops the reactor first,
/// then drains the writer queue, then joins the workers.
pub struct Engine {
    reactor: ReactorHandle,
    reactor_thread: Option<JoinHandle<()>>,
    writer: SerialQueue,
    workers: WorkerPool,
    context: HandlerContext,
}

impl Engine {
    pub(crate) fn new(config: EngineBuilder) -> io::Result<Self> {
        let (reactor, reactor_thread) = Reactor::start(config.event_capacity)?;

        let contexts = SerialQueue::new("fastwire-writer")
            .and_then(|writer| Ok((writer, WorkerPool::new(config.worker_threads)?)));

        let (writer, workers) = match contexts {
            Ok(contexts) => contexts,
            Err(e) => {
                reactor.shutdown();
                let _ = reactor_thread.join();
                return Err(e);
            }
        };

        let context = HandlerContext {
            registrar: Arc::new(reactor.clone()),
            writer: writer.handle(),
            read_chunk_size: config.read_chunk_size,
            keep_alive: config.keep_alive,
        };

        debug!("engine started with {} workers", workers.size());

        Ok(Self {
            reactor,
            reactor_thread: Some(reactor_thread),
            writer,
            workers,
            context,
        })
    }

    /// Creates an engine with the default configuration.
    pub fn new_default() -> io::Result<Self> {
        EngineBuilder::new().build()
    }

    /// The services each connection handler is built from.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn registrar(&self) -> Arc<dyn Registrar> {
        self.context.registrar.clone()
    }

    /// Submission handle for the writer queue.
    pub fn writer(&self) -> QueueHandle {
        self.writer.handle()
    }

    /// Submission handle for the worker pool.
    pub fn workers(&self) -> QueueHandle {
        self.workers.handle()
    }

    /// Attaches a connected transport and starts serving it.
    pub fn attach<T, F>(&self, transport: T, make_processor: F) -> io::Result<Arc<SocketHandler>>
    where
        T: Transport + 'static,
        F: FnOnce(ConnectionHandle) -> Box<dyn Processor>,
    {
        SocketHandler::new(transport, &self.context, make_processor)
    }

    /// Opens a FastCGI connection to an application at `address`.
    pub fn fcgi_client(&self, address: &str, timeout: Duration) -> io::Result<FcgiClient> {
        FcgiClient::connect(address, timeout, &self.context)
    }

    /// Stops every execution context in order.
    ///
    /// Consumers parked on a blocking reader must be released first, or
    /// joining the worker pool waits for them.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.reactor_thread.take() else {
            return;
        };

        debug!("engine shutting down");

        self.reactor.shutdown();
        if thread.join().is_err() {
            warn!("reactor thread panicked");
        }

        self.writer.shutdown();
        self.workers.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
