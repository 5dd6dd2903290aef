use super::{ResultSource, Shared};
use super::tracker::BatchTracker;
use crate::catalog::WorkItem;
use crate::engine::{ItemResult, RenderEngine};
use crate::queue::Job;
use crate::store::StatusStore;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Take batches off the queue until it is empty or the pipeline stops
pub(super) async fn run_worker<E: RenderEngine, S: StatusStore>(
    worker_id: usize,
    shared: Arc<Shared<E, S>>,
) {
    debug!(worker_id, "Thumbnail worker started");
    let mut batches = 0usize;

    loop {
        if shared.stopped.load(Ordering::Acquire) {
            debug!(worker_id, "Stop requested, worker exiting");
            break;
        }

        let dispatched = assemble_batch(&shared);
        if dispatched.is_empty() {
            break;
        }
        process_batch(worker_id, &shared, dispatched).await;
        batches += 1;
    }

    debug!(worker_id, batches, "Thumbnail worker finished");
}

/// Dequeue up to `batch_size` renderable items
///
/// Ineligible items are finalized on the spot and do not count toward the
/// batch, so an empty result means the queue ran dry.
fn assemble_batch<E: RenderEngine, S: StatusStore>(shared: &Shared<E, S>) -> Vec<(WorkItem, Job)> {
    let batch_size = shared.config.batch_size;
    let mut dispatched = Vec::with_capacity(batch_size);

    while dispatched.len() < batch_size {
        // Counted before the pop so the item is never missing from pending_total
        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let Some(item) = shared.queue.try_dequeue() else {
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            break;
        };

        if let Some(reason) = skip_reason(&item) {
            shared.finalize(&item, ItemResult::failed(reason), ResultSource::Skipped);
            continue;
        }

        let job = Job::for_item(
            &item,
            &shared.output.dir,
            &shared.output.extension,
            shared.output.size,
        );
        dispatched.push((item, job));
    }

    dispatched
}

fn skip_reason(item: &WorkItem) -> Option<String> {
    if !item.kind.is_renderable() {
        Some(format!("Unsupported file type: {}", item.kind))
    } else if !item.path.exists() {
        Some(format!("File not found: {}", item.path.display()))
    } else {
        None
    }
}

async fn process_batch<E: RenderEngine, S: StatusStore>(
    worker_id: usize,
    shared: &Shared<E, S>,
    dispatched: Vec<(WorkItem, Job)>,
) {
    let tracker = BatchTracker::new(dispatched);
    let jobs = tracker.jobs();

    let on_result = |result: ItemResult| match tracker.claim_result(&result) {
        Some(entry) => {
            let result = verify(result, &entry.job);
            shared.finalize(&entry.item, result, ResultSource::Streamed);
        }
        None => debug!(
            worker_id,
            output = ?result.output_path,
            input = ?result.input_path,
            "Engine result matched no pending job"
        ),
    };

    let outcome = shared.engine.render_batch(&jobs, &on_result).await;

    let missing = tracker.unacknowledged();
    if outcome.success && missing.is_empty() {
        debug!(worker_id, jobs = jobs.len(), "Batch complete");
        return;
    }

    info!(
        worker_id,
        jobs = jobs.len(),
        delivered = outcome.delivered,
        missing = missing.len(),
        error = outcome.error.as_deref().unwrap_or("none"),
        "Retrying unacknowledged jobs individually"
    );

    for entry in missing {
        let result = shared.engine.render_one(&entry.job).await;
        if entry.claim() {
            shared.finalize(&entry.item, verify(result, &entry.job), ResultSource::Fallback);
        }
    }
}

/// Treat a reported success without a thumbnail on disk as a failure
fn verify(mut result: ItemResult, job: &Job) -> ItemResult {
    if !result.success {
        return result;
    }

    let exists = result
        .output_path
        .get_or_insert_with(|| job.output.clone())
        .exists();
    if !exists {
        warn!(
            input = %job.input.display(),
            output = ?result.output_path,
            "Engine reported success but wrote no thumbnail"
        );
        result.success = false;
        result.error = Some("Engine reported success but the thumbnail is missing".to_string());
        result.output_path = None;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FileKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn job(output: PathBuf) -> Job {
        Job {
            item_id: "1".to_string(),
            input: PathBuf::from("/m/cube.stl"),
            output,
            size: 256,
        }
    }

    #[test]
    fn success_without_file_becomes_failure() {
        let dir = TempDir::new().unwrap();
        let job = job(dir.path().join("never-written.png"));

        let result = verify(ItemResult::succeeded(job.output.clone()), &job);
        assert!(!result.success);
        assert!(result.output_path.is_none());
        assert!(result.error_message().contains("missing"));
    }

    #[test]
    fn success_without_path_uses_job_output() {
        let dir = TempDir::new().unwrap();
        let job = job(dir.path().join("thumb.png"));
        std::fs::write(&job.output, b"png").unwrap();

        let reported = ItemResult {
            success: true,
            ..ItemResult::default()
        };
        let result = verify(reported, &job);
        assert!(result.success);
        assert_eq!(result.output_path, Some(job.output.clone()));
    }

    #[test]
    fn failures_pass_through_unchanged() {
        let job = job(PathBuf::from("/t/x.png"));
        let result = verify(ItemResult::failed("bad mesh"), &job);
        assert_eq!(result.error.as_deref(), Some("bad mesh"));
    }

    #[test]
    fn skip_reasons() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("cube.stl");
        std::fs::write(&present, b"solid").unwrap();

        assert!(skip_reason(&WorkItem::new("a", present)).is_none());

        let gcode = WorkItem::new("b", dir.path().join("part.gcode"));
        assert_eq!(gcode.kind, FileKind::Gcode);
        assert!(skip_reason(&gcode).unwrap().contains("Unsupported"));

        let missing = WorkItem::new("c", dir.path().join("gone.3mf"));
        assert!(skip_reason(&missing).unwrap().contains("not found"));
    }
}
