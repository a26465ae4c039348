//! Session and message persistence contracts.
//!
//! The engine is generic over these traits; [`InMemoryStore`] is the
//! reference implementation used by the gateway binary and by tests.

pub mod store;

pub use store::{FileHistoryStore, FileVersion, InMemoryStore, MessageStore, SessionStore};
