//! Shared domain types for the Lookout control panel.

pub mod config;
pub mod events;
pub mod images;
pub mod instance;

mod errors;

pub use errors::{LookoutError, Result};
