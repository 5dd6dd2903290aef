//! Engine Module
//!
//! Bridge to the external thumbnail rendering engine. The engine is an
//! opaque script run by an interpreter; only its argument and JSON output
//! contract matters here.

pub mod availability;
pub mod protocol;
pub mod script;

pub use availability::AvailabilityCache;
pub use protocol::{BatchSummary, Dimensions, ItemResult, MeshMetadata};
pub use script::ScriptEngine;

use crate::queue::Job;
use std::future::Future;

/// Callback receiving each streamed result as soon as the engine reports it
pub type ResultCallback<'a> = &'a (dyn Fn(ItemResult) + Send + Sync);

/// Outcome of a streaming batch call
///
/// Individual results are delivered through the callback; this only
/// carries the aggregate view.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// True when the engine exited cleanly and reported a summary
    pub success: bool,
    /// Summary line reported by the engine, if any arrived
    pub summary: Option<BatchSummary>,
    /// Number of results handed to the callback
    pub delivered: usize,
    /// Why the batch failed as a whole
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn failed(
        error: impl Into<String>,
        delivered: usize,
        summary: Option<BatchSummary>,
    ) -> Self {
        Self {
            success: false,
            summary,
            delivered,
            error: Some(error.into()),
        }
    }
}

/// A thumbnail rendering backend
///
/// Implementations never fail past their own boundary: errors become
/// failed results.
pub trait RenderEngine: Send + Sync + 'static {
    /// Whether the engine can currently be invoked
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Render a single job and wait for its result
    fn render_one(&self, job: &Job) -> impl Future<Output = ItemResult> + Send;

    /// Render a batch, invoking `on_result` for every result as it streams in
    fn render_batch(
        &self,
        jobs: &[Job],
        on_result: ResultCallback<'_>,
    ) -> impl Future<Output = BatchOutcome> + Send;
}
