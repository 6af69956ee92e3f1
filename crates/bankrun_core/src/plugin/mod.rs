//! Plugin execution kernel.
//!
//! Manifests are discovered from disk into an owned snapshot; each run stages
//! a contract directory, launches the plugin entry script as a child process
//! and reads back its output file.

pub mod contract;
pub mod invoker;
pub mod kernel;
pub mod manifest;
