//! # Adapters
//!
//! Concrete implementations of the outbound ports plus the background
//! tail worker.

pub mod clock;
pub mod memory;
pub mod tail;

pub use clock::ManualClock;
pub use memory::{InMemoryStore, Port, PurgeReport};
pub use tail::{TailDispatcher, TailJob, TailTargets};
