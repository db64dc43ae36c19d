//! Migration host library
//!
//! Extracts uploaded archives, supervises the migration worker and measures both.

mod local_logger;
mod prelude;
mod request_client;

pub mod bridge;
pub mod cli;
pub mod config;
pub mod extraction;
pub mod handlers;
pub mod helpers;
pub mod logger;
pub mod outcome;
pub mod supervisor;
pub mod telemetry;

pub use local_logger::clean_logger;
pub use outcome::Outcome;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
