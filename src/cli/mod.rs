//! Operator CLI for the fetch layer.

mod commands;
mod helpers;
mod icons;

pub use commands::{is_verbose, run};
