//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate model, store and scheduler calls into use-case level APIs.
//! - Keep presentation layers decoupled from storage and timer details.

pub mod pet_service;
