//! Wire format spoken with the rendering engine.
//!
//! Single-item calls print one JSON object. Batch calls read a job list from
//! stdin and, in streaming mode, print one JSON message per line.

use crate::queue::Job;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of rendering one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default, rename = "file_path")]
    pub input_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<MeshMetadata>,
}

impl ItemResult {
    pub fn succeeded(output_path: PathBuf) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Error text, or a generic message when the engine gave none
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Rendering engine reported failure".to_string())
    }
}

/// Mesh statistics reported alongside a render
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshMetadata {
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub triangles: Option<u64>,
}

/// Bounding box extents in model units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Aggregate reported at the end of a streaming batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub succeeded: usize,
    #[serde(default)]
    pub failed: usize,
}

/// One line of streaming output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Result(ItemResult),
    Summary(BatchSummary),
}

/// Batch request written to the engine's stdin
#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    pub jobs: Vec<JobSpec<'a>>,
}

#[derive(Debug, Serialize)]
pub struct JobSpec<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub size: u32,
}

impl<'a> BatchRequest<'a> {
    pub fn new(jobs: &'a [Job]) -> Self {
        Self {
            jobs: jobs
                .iter()
                .map(|job| JobSpec {
                    input: &job.input,
                    output: &job.output,
                    size: job.size,
                })
                .collect(),
        }
    }
}

/// Parse one line of streaming output. Diagnostic text and unknown
/// message types yield `None`.
pub fn parse_stream_line(line: &str) -> Option<StreamMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Parse the stdout of a single-item call
///
/// The object may be pretty-printed and may follow diagnostic output, so the
/// whole text is tried first, then everything from each opening brace that
/// starts a line.
pub fn parse_single_output(stdout: &str) -> Option<ItemResult> {
    let trimmed = stdout.trim();
    if let Ok(result) = serde_json::from_str(trimmed) {
        return Some(result);
    }

    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        if line.trim_start().starts_with('{')
            && let Ok(result) = serde_json::from_str(stdout[offset..].trim())
        {
            return Some(result);
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_line() {
        let line = r#"{"type":"result","data":{"success":true,"output_path":"/t/a.png","file_path":"/m/a.stl","error":null,"metadata":{"dimensions":{"x":1.0,"y":2.0,"z":3.5},"triangles":12}}}"#;
        match parse_stream_line(line) {
            Some(StreamMessage::Result(result)) => {
                assert!(result.success);
                assert_eq!(result.output_path, Some(PathBuf::from("/t/a.png")));
                assert_eq!(result.input_path, Some(PathBuf::from("/m/a.stl")));
                let metadata = result.metadata.unwrap();
                assert_eq!(metadata.triangles, Some(12));
                assert_eq!(metadata.dimensions.unwrap().z, 3.5);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn parses_summary_line_ignoring_result_list() {
        let line = r#"{"type":"summary","data":{"success":true,"total":5,"succeeded":4,"failed":1,"results":[]}}"#;
        assert_eq!(
            parse_stream_line(line),
            Some(StreamMessage::Summary(BatchSummary {
                success: true,
                total: 5,
                succeeded: 4,
                failed: 1,
            }))
        );
    }

    #[test]
    fn ignores_diagnostics_and_unknown_types() {
        assert_eq!(parse_stream_line("Processing: benchy.stl"), None);
        assert_eq!(parse_stream_line(""), None);
        assert_eq!(parse_stream_line(r#"{"type":"progress","data":{}}"#), None);
        assert_eq!(parse_stream_line(r#"{"type":"result""#), None);
    }

    #[test]
    fn parses_pretty_single_output_after_diagnostics() {
        let stdout = "loading mesh\n{\n  \"success\": false,\n  \"error\": \"No triangles found\"\n}\n";
        let result = parse_single_output(stdout).unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No triangles found"));
    }

    #[test]
    fn single_output_without_json_is_none() {
        assert_eq!(parse_single_output("Traceback (most recent call last):\n"), None);
    }

    #[test]
    fn request_lists_every_job() {
        let jobs = vec![Job {
            item_id: "1".to_string(),
            input: PathBuf::from("/m/a.stl"),
            output: PathBuf::from("/t/a.png"),
            size: 256,
        }];
        let json = serde_json::to_value(BatchRequest::new(&jobs)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"jobs": [{"input": "/m/a.stl", "output": "/t/a.png", "size": 256}]})
        );
    }
}
