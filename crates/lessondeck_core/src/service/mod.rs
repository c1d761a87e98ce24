//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep transports and sync tasks decoupled from storage details.

pub mod deck_service;
