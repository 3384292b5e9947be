//! Flowgate Sweeper
//!
//! Periodically runs the SLA sweep against the PostgreSQL store.
//!
//! This crate provides:
//! - REST clients for the domain, directory and notification collaborators
//! - The interval loop driving `SlaSweep::run_once`

pub mod client;
pub mod config;
pub mod sweeper;

pub use config::SweeperConfig;
pub use sweeper::Sweeper;
