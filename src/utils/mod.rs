//! Shared utility functions.
//!
//! - `format`: human-readable sizes for CLI output
//! - `fs`: crash-safe file replacement

mod format;
mod fs;

pub use format::format_bytes;
pub use fs::{write_atomic, write_atomic_async};
