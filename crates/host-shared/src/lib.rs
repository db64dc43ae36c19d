//! Wire types shared between the migration host and the UI process driving it.
//!
//! WARNING: Has to be in sync with the UI bridge client.

pub mod bridge;
pub mod events;
pub mod summary;

pub const CURRENT_PROTOCOL_VERSION: u64 = 1;
