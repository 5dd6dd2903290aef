//! Thumbnailer
//!
//! Background thumbnail generation for a 3D-print catalog. Meshes are queued,
//! rendered in batches by an external engine script, and each outcome is
//! written back to a status store and reported to progress listeners.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod utils;

pub use error::{AppError, Result};
