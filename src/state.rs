//! Persisted state - the small key-value store that carries mode and user toggles
//! across restarts.

mod persistence;

pub use persistence::{JsonStateStore, PersistedState, StateStore};
