use super::protocol::{
    BatchRequest, BatchSummary, ItemResult, StreamMessage, parse_single_output, parse_stream_line,
};
use super::{AvailabilityCache, BatchOutcome, RenderEngine, ResultCallback};
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::queue::Job;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

/// Probe processes that hang are treated as unavailable
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lines of engine stderr kept for error messages
const STDERR_TAIL_LINES: usize = 5;

/// Rendering engine run as `<interpreter> <script> ...`
pub struct ScriptEngine {
    config: EngineConfig,
    availability: AvailabilityCache,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig) -> Self {
        let availability = AvailabilityCache::new(config.availability_ttl());
        Self {
            config,
            availability,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop the cached availability so the next check spawns a probe
    pub async fn invalidate_availability(&self) {
        self.availability.invalidate().await;
    }

    /// Check the interpreter responds and the script exists
    async fn probe(&self) -> bool {
        if !self.config.script.exists() {
            warn!(
                script = %self.config.script.display(),
                "Rendering script not found"
            );
            return false;
        }

        let status = Command::new(&self.config.interpreter)
            .args(&self.config.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match timeout(PROBE_TIMEOUT, status).await {
            Ok(Ok(status)) if status.success() => true,
            Ok(Ok(status)) => {
                warn!(
                    interpreter = %self.config.interpreter,
                    %status,
                    "Engine interpreter probe failed"
                );
                false
            }
            Ok(Err(e)) => {
                warn!(
                    interpreter = %self.config.interpreter,
                    error = %e,
                    "Engine interpreter could not be started"
                );
                false
            }
            Err(_) => {
                warn!(interpreter = %self.config.interpreter, "Engine probe timed out");
                false
            }
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&self.config.script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run_single(&self, job: &Job) -> Result<ItemResult, AppError> {
        let limit = self.config.single_timeout(job.input_size());

        let mut child = self
            .command()
            .arg(&job.input)
            .arg(&job.output)
            .arg(job.size.to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| AppError::EngineSpawn(e.to_string()))?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(stderr_tail(err)));

        let status = match timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                terminate(&mut child).await;
                return Err(AppError::Timeout(limit));
            }
        };

        let stdout = match stdout {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        match parse_single_output(&stdout) {
            Some(result) => Ok(result),
            None => {
                let tail = collect_tail(stderr, self.config.salvage_grace()).await;
                Err(AppError::EngineFailed(describe_exit(
                    "Engine returned no result",
                    status,
                    &tail,
                )))
            }
        }
    }

    async fn run_batch(&self, jobs: &[Job], on_result: ResultCallback<'_>) -> BatchOutcome {
        let limit = self.config.batch_timeout(jobs.len());
        let deadline = Instant::now() + limit;

        let mut child = match self
            .command()
            .arg("--batch-stdin")
            .arg(self.config.concurrency.to_string())
            .arg("--stream")
            .stdin(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                return BatchOutcome::failed(format!("Failed to start engine: {}", e), 0, None);
            }
        };

        let stderr = child.stderr.take().map(|err| tokio::spawn(stderr_tail(err)));

        if let Some(mut stdin) = child.stdin.take() {
            match serde_json::to_vec(&BatchRequest::new(jobs)) {
                Ok(payload) => {
                    let write = async {
                        stdin.write_all(&payload).await?;
                        stdin.shutdown().await
                    };
                    match timeout_at(deadline, write).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(error = %e, "Failed to send batch to engine"),
                        Err(_) => warn!("Timed out sending batch to engine"),
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode batch request"),
            }
            // Dropping stdin closes the pipe so the engine sees EOF
        }

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child).await;
            return BatchOutcome::failed("Engine stdout unavailable", 0, None);
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut stream = StreamState::default();

        loop {
            match timeout_at(deadline, lines.next_line()).await {
                Ok(Ok(Some(line))) => stream.dispatch(&line, on_result),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed reading engine output");
                    break;
                }
                Err(_) => {
                    warn!(
                        jobs = jobs.len(),
                        timeout_secs = limit.as_secs(),
                        delivered = stream.delivered,
                        "Batch timed out, killing engine"
                    );
                    terminate(&mut child).await;

                    // Salvage whatever the engine managed to flush before dying
                    let grace = Instant::now() + self.config.salvage_grace();
                    while let Ok(Ok(Some(line))) = timeout_at(grace, lines.next_line()).await {
                        stream.dispatch(&line, on_result);
                    }

                    return BatchOutcome::failed(
                        AppError::Timeout(limit).to_string(),
                        stream.delivered,
                        stream.summary,
                    );
                }
            }
        }

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return BatchOutcome::failed(
                    format!("Failed to wait for engine: {}", e),
                    stream.delivered,
                    stream.summary,
                );
            }
            Err(_) => {
                terminate(&mut child).await;
                return BatchOutcome::failed(
                    AppError::Timeout(limit).to_string(),
                    stream.delivered,
                    stream.summary,
                );
            }
        };

        if !status.success() {
            let tail = collect_tail(stderr, self.config.salvage_grace()).await;
            return BatchOutcome::failed(
                describe_exit("Engine exited abnormally", status, &tail),
                stream.delivered,
                stream.summary,
            );
        }

        match stream.summary {
            Some(summary) => BatchOutcome {
                success: true,
                summary: Some(summary),
                delivered: stream.delivered,
                error: None,
            },
            None => BatchOutcome::failed(
                "Engine finished without a summary",
                stream.delivered,
                None,
            ),
        }
    }
}

impl RenderEngine for ScriptEngine {
    async fn is_available(&self) -> bool {
        self.availability.get_or_probe(|| self.probe()).await
    }

    async fn render_one(&self, job: &Job) -> ItemResult {
        debug!(input = %job.input.display(), "Rendering single thumbnail");
        match self.run_single(job).await {
            Ok(result) => result,
            Err(e) => {
                warn!(input = %job.input.display(), error = %e, "Single render failed");
                ItemResult::failed(e.to_string())
            }
        }
    }

    async fn render_batch(&self, jobs: &[Job], on_result: ResultCallback<'_>) -> BatchOutcome {
        if jobs.is_empty() {
            return BatchOutcome {
                success: true,
                ..BatchOutcome::default()
            };
        }

        info!(jobs = jobs.len(), "Dispatching batch to engine");
        let outcome = self.run_batch(jobs, on_result).await;
        if let Some(ref error) = outcome.error {
            warn!(
                jobs = jobs.len(),
                delivered = outcome.delivered,
                %error,
                "Batch did not complete cleanly"
            );
        }
        outcome
    }
}

/// Results and summary gathered from a streaming batch
#[derive(Default)]
struct StreamState {
    delivered: usize,
    summary: Option<BatchSummary>,
}

impl StreamState {
    fn dispatch(&mut self, line: &str, on_result: ResultCallback<'_>) {
        match parse_stream_line(line) {
            Some(StreamMessage::Result(result)) => {
                self.delivered += 1;
                on_result(result);
            }
            Some(StreamMessage::Summary(summary)) => {
                debug!(
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Engine batch summary"
                );
                self.summary = Some(summary);
            }
            None => debug!(line, "Ignoring engine output"),
        }
    }
}

/// Kill the engine and reap it
async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill engine process");
    }
}

async fn read_all(mut reader: impl AsyncRead + Unpin) -> String {
    let mut buf = String::new();
    let _ = reader.read_to_string(&mut buf).await;
    buf
}

async fn stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

async fn collect_tail(task: Option<JoinHandle<String>>, grace: Duration) -> String {
    match task {
        Some(task) => match timeout(grace, task).await {
            Ok(Ok(tail)) => tail,
            _ => String::new(),
        },
        None => String::new(),
    }
}

fn describe_exit(context: &str, status: ExitStatus, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        format!("{} ({})", context, status)
    } else {
        format!("{} ({}): {}", context, status, stderr.trim())
    }
}
