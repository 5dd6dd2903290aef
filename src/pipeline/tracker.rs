use crate::catalog::WorkItem;
use crate::engine::ItemResult;
use crate::queue::Job;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// A dispatched job and whether its item has been finalized
pub struct TrackedJob {
    pub item: WorkItem,
    pub job: Job,
    finalized: AtomicBool,
}

impl TrackedJob {
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Take ownership of finalizing this item. Only the first caller wins.
    pub fn claim(&self) -> bool {
        self.finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Acknowledgement state for one batch
///
/// Streamed results, fallback retries and timeouts may all race to finalize
/// the same item; `claim` makes sure exactly one of them does.
pub struct BatchTracker {
    entries: Vec<TrackedJob>,
}

impl BatchTracker {
    pub fn new(dispatched: Vec<(WorkItem, Job)>) -> Self {
        Self {
            entries: dispatched
                .into_iter()
                .map(|(item, job)| TrackedJob {
                    item,
                    job,
                    finalized: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.entries.iter().map(|e| e.job.clone()).collect()
    }

    /// Claim the job a streamed result belongs to
    ///
    /// Results are matched by output path; results without one fall back to
    /// the first unfinalized job with the same input. Returns `None` for
    /// unknown or already finalized jobs.
    pub fn claim_result(&self, result: &ItemResult) -> Option<&TrackedJob> {
        if let Some(output) = result.output_path.as_deref()
            && let Some(entry) = self.entries.iter().find(|e| e.job.output == output)
        {
            if entry.claim() {
                return Some(entry);
            }
            warn!(
                id = %entry.item.id,
                output = %output.display(),
                "Duplicate result for an already finalized item"
            );
            return None;
        }

        let input = result.input_path.as_deref()?;
        self.entries
            .iter()
            .filter(|e| e.job.input == input)
            .find(|e| e.claim())
    }

    /// Jobs nobody has finalized yet
    pub fn unacknowledged(&self) -> Vec<&TrackedJob> {
        self.entries.iter().filter(|e| !e.is_finalized()).collect()
    }
}
