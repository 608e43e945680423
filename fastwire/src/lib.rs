//! # Fastwire
//!
//! **Fastwire** is the non-blocking connection engine and FastCGI codec
//! underneath an HTTP/FastCGI server.
//!
//! It takes readiness notifications for client connections, drains
//! inbound bytes into a pluggable protocol processor, buffers outbound
//! bytes until the kernel takes them, and speaks the FastCGI record
//! protocol to upstream application servers. Readiness comes from epoll
//! (Linux) or kqueue (macOS) on a dedicated reactor thread.
//!
//! The engine is built from a few explicit pieces:
//!
//! - A **reactor** thread dispatching read and write readiness
//! - A **serial writer queue** through which every outbound write passes
//! - A **worker pool** for consumers that block
//! - A **socket handler** per connection, driving a [`net::Processor`]
//! - A **blocking reader** bridging push-style delivery to pull-style reads
//! - A **FastCGI codec** with a client channel built on top of it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fastwire::EngineBuilder;
//! use std::time::Duration;
//!
//! let engine = EngineBuilder::new().worker_threads(2).build()?;
//!
//! let client = engine.fcgi_client("127.0.0.1:9000", Duration::from_secs(1))?;
//! let response = client.response_reader().spawn(&engine.workers(), 1)?;
//!
//! client.send_request(1, [("SCRIPT_FILENAME", "/srv/index.php")], b"")?;
//!
//! let response = response.recv()??;
//! println!("{}", String::from_utf8_lossy(&response.stdout));
//! ```
//!
//! ## Modules
//!
//! - [`net`] — Transports, socket handlers and processors
//! - [`fcgi`] — FastCGI records, encoding, decoding and the client channel
//! - [`adapter`] — The blocking reader
//! - [`executor`] — Serial queue and worker pool
//! - [`reactor`] — Readiness registration
//! - [`sync`] — Counting semaphore

mod engine;

pub mod adapter;
pub mod executor;
pub mod fcgi;
pub mod net;
pub mod reactor;
pub mod sync;

pub use engine::{Engine, EngineBuilder};
