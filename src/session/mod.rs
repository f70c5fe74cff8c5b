//! Stream session management
//!
//! The controller runs one generation per conversation against a backend;
//! the seed guard makes sure a conversation's initial message streams once.

pub mod controller;
pub mod metrics;
pub mod seed;

pub use controller::{SessionEvent, StreamController, StreamState, StreamUpdate};
pub use seed::{SeedGuard, SeedOutcome};
