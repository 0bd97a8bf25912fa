//! Persistent storage: the bounded alert history.

pub mod history;

pub use history::{AlertHistory, StorageError};
