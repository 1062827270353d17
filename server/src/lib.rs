//! Maestro server composition root.
//!
//! Loads configuration, initializes telemetry, gates startup on schema
//! migrations, and wires the orchestration core together. The HTTP and
//! WebSocket endpoint surface is a separate thin transport that borrows
//! components from [`setup::App`].

pub mod config;
pub mod setup;
pub mod telemetry;

pub use config::Config;
pub use setup::{initialize_app, App};
