//! Connection-level networking.
//!
//! This module provides the pieces between a raw socket and a protocol:
//! - [`Transport`], the non-blocking byte transport a connection runs on,
//!   with [`TcpTransport`] as the socket implementation,
//! - [`SocketHandler`], which drains reads into a [`Processor`] and
//!   buffers writes until the transport takes them,
//! - [`ConnectionHandle`], the back-reference a processor writes through,
//! - [`TcpListener`], for bootstrap code and tests.
mod handler;
mod listener;
mod processor;
mod transport;

pub use handler::{ConnectionHandle, HandlerContext, SocketHandler};
pub use listener::TcpListener;
pub use processor::{Processor, ProcessorState};
pub use transport::{TcpTransport, Transport};
