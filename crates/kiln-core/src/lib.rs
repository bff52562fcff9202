//! Kiln Core - Foundational types for the Kiln generation pipeline
//!
//! This crate provides the types that all other Kiln crates depend on:
//! - `KilnError` - The error taxonomy shared by the orchestrator, materializer and library
//! - `ContentHash` - SHA-256 based content hashing for materialized artifacts
//! - `write_document` - whole-file replacement for the JSON documents Kiln persists

mod document;
mod error;
mod hash;

pub use document::write_document;
pub use error::{KilnError, Result};
pub use hash::ContentHash;
