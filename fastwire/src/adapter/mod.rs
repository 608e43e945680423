//! Push-to-pull bridge.
//!
//! The transport delivers bytes push-style from readiness callbacks,
//! while upper protocol layers are written against a blocking
//! `read(into) -> count` contract. [`BlockingReader`] sits between the
//! two so the upper layer can run on a worker thread without ever
//! stalling the reactor.

mod reader;

pub use reader::BlockingReader;
