//! Client-side synchronization: debounced persistence and collaborator
//! signalling.
//!
//! # Responsibility
//! - `scheduler` turns deck revisions into bulk-replace calls.
//! - `realtime` carries presence and reload signals between peers.

pub mod realtime;
pub mod scheduler;
