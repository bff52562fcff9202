//! CLI command implementations

pub mod generate;
pub mod job;
pub mod library;
pub mod synth;
pub mod watch;
