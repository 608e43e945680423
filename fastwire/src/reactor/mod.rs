//! Reactor core and readiness dispatch.
//!
//! The reactor is the shared readiness-notification execution context.
//! It owns the platform poller on a dedicated thread and:
//! - watches descriptors for read and write readiness,
//! - invokes the registered callback for each ready registration,
//! - applies registration changes requested from other threads.
//!
//! Components never touch the poller directly. They hold a
//! [`ReactorHandle`] through the [`Registrar`] capability, which keeps the
//! platform mechanism behind a single seam and lets tests substitute it.

mod core;

pub(crate) mod command;
pub(crate) mod event;
pub(crate) mod poller;
pub(crate) mod source;

pub(crate) use core::Reactor;
pub use core::ReactorHandle;
pub use source::{Direction, ReadyCallback, Registrar, Registration};
