//! Server-wide execution contexts and their configuration.

mod builder;
mod core;

pub use builder::EngineBuilder;
pub use core::Engine;
