//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define deck persistence and directory lookup contracts.
//! - Isolate SQLite query details from service and sync orchestration.
//!
//! # Invariants
//! - Deck writes are whole-deck replacements inside one transaction.
//! - Repository APIs return semantic errors (`LessonNotFound`, `Timeout`) in
//!   addition to DB transport errors.

pub mod deck_repo;
pub mod directory_repo;
