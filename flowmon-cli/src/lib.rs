//! flowmon command-line tool.
//!
//! Command handlers are exposed as a library so they can be driven from
//! integration tests without spawning the binary.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
