//! Ghostpilot: an autonomous browser orchestration engine.
//!
//! The binary wires the subsystem crates together: a warm pool of
//! isolated ghost contexts, a scheduler that leases them out, and the
//! perception-action loop driving each lease through the Chrome
//! DevTools Protocol.

pub mod cli;
pub mod config;
pub mod logging;

pub use config::GhostConfig;
