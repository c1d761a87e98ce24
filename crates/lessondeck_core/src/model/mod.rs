//! Domain model for lesson decks and document highlights.
//!
//! # Responsibility
//! - Define canonical data structures shared by store, sync and persistence.
//! - Keep one serialized shape for client payloads and storage snapshots.
//!
//! # Invariants
//! - Decks are plain owned trees; no shared mutable references between items.
//! - User references are identifiers resolved at write time, never embedded
//!   authoritative records.

pub mod deck;
pub mod highlight;
pub mod lesson;
