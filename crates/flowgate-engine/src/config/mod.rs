//! Configuration for the Flowgate engine.
//!
//! Configuration is loaded from environment variables using the `envy`
//! crate for type-safe environment variable parsing.

mod database;
mod engine;

pub use database::DatabaseConfig;
pub use engine::EngineConfig;
