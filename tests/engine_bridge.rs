#![cfg(unix)]

use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thumbnailer::config::EngineConfig;
use thumbnailer::engine::{ItemResult, RenderEngine, ScriptEngine};
use thumbnailer::queue::Job;

fn engine(dir: &Path, script: &str) -> ScriptEngine {
    let path = dir.join("engine.sh");
    std::fs::write(&path, script).unwrap();
    ScriptEngine::new(EngineConfig {
        interpreter: "sh".to_string(),
        probe_args: vec!["-c".to_string(), "exit 0".to_string()],
        script: path,
        single_timeout_secs: 5,
        batch_base_timeout_secs: 5,
        batch_item_timeout_secs: 1,
        salvage_grace_ms: 300,
        ..EngineConfig::default()
    })
}

fn jobs(dir: &Path, n: usize) -> Vec<Job> {
    (0..n)
        .map(|i| Job {
            item_id: i.to_string(),
            input: dir.join(format!("m{}.stl", i)),
            output: dir.join(format!("t{}.png", i)),
            size: 256,
        })
        .collect()
}

fn result_line(output: &str) -> String {
    format!(
        r#"echo '{{"type":"result","data":{{"success":true,"output_path":"{}"}}}}'"#,
        output
    )
}

#[tokio::test]
async fn streamed_results_arrive_before_return() {
    let dir = TempDir::new().unwrap();
    let mut script = String::from("cat > /dev/null\necho 'loading 5 meshes'\n");
    for i in 0..5 {
        script.push_str(&result_line(&format!("/t/{}.png", i)));
        script.push('\n');
    }
    script.push_str(
        r#"echo '{"type":"summary","data":{"success":true,"total":5,"succeeded":5,"failed":0}}'"#,
    );
    script.push('\n');
    let engine = engine(dir.path(), &script);

    let seen = Mutex::new(Vec::new());
    let on_result = |result: ItemResult| seen.lock().unwrap().push(result);
    let outcome = engine.render_batch(&jobs(dir.path(), 5), &on_result).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.delivered, 5);
    assert_eq!(outcome.summary.unwrap().total, 5);

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[4].output_path, Some(PathBuf::from("/t/4.png")));
}

#[tokio::test]
async fn crash_after_partial_output_reports_delivered_results() {
    let dir = TempDir::new().unwrap();
    let script = format!(
        "cat > /dev/null\n{}\n{}\necho 'Segmentation fault in mesh loader' >&2\nexit 3\n",
        result_line("/t/0.png"),
        result_line("/t/1.png"),
    );
    let engine = engine(dir.path(), &script);

    let seen = Mutex::new(0usize);
    let on_result = |_: ItemResult| *seen.lock().unwrap() += 1;
    let outcome = engine.render_batch(&jobs(dir.path(), 4), &on_result).await;

    assert!(!outcome.success);
    assert_eq!(outcome.delivered, 2);
    assert_eq!(*seen.lock().unwrap(), 2);
    let error = outcome.error.unwrap();
    assert!(error.contains("Segmentation fault"), "{}", error);
}

#[tokio::test]
async fn clean_exit_without_summary_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let script = format!("cat > /dev/null\n{}\n", result_line("/t/0.png"));
    let engine = engine(dir.path(), &script);

    let outcome = engine.render_batch(&jobs(dir.path(), 2), &|_: ItemResult| {}).await;
    assert!(!outcome.success);
    assert_eq!(outcome.delivered, 1);
    assert!(outcome.error.unwrap().contains("summary"));
}

#[tokio::test]
async fn batch_timeout_kills_engine_and_salvages_output() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("engine.pid");
    let script = format!(
        "cat > /dev/null\n{}\necho $$ > {}\nexec sleep 30\n",
        result_line("/t/0.png"),
        pid_file.display()
    );
    let engine = {
        let path = dir.path().join("engine.sh");
        std::fs::write(&path, script).unwrap();
        ScriptEngine::new(EngineConfig {
            interpreter: "sh".to_string(),
            probe_args: vec!["-c".to_string(), "exit 0".to_string()],
            script: path,
            batch_base_timeout_secs: 1,
            batch_item_timeout_secs: 0,
            salvage_grace_ms: 300,
            ..EngineConfig::default()
        })
    };

    let seen = Mutex::new(0usize);
    let on_result = |_: ItemResult| *seen.lock().unwrap() += 1;
    let started = Instant::now();
    let outcome = engine.render_batch(&jobs(dir.path(), 3), &on_result).await;
    let elapsed = started.elapsed();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));
    assert_eq!(outcome.delivered, 1);
    assert_eq!(*seen.lock().unwrap(), 1);
    assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(kill(Pid::from_raw(pid), None).is_err(), "engine still running");
}

#[tokio::test]
async fn single_render_parses_pretty_json_after_diagnostics() {
    let dir = TempDir::new().unwrap();
    let script = concat!(
        "echo \"Loading $1\"\n",
        "printf '{\\n  \"success\": true,\\n  \"output_path\": \"%s\",\\n",
        "  \"metadata\": {\"triangles\": 12}\\n}\\n' \"$2\"\n",
    );
    let engine = engine(dir.path(), script);
    let jobs = jobs(dir.path(), 1);
    let job = &jobs[0];

    let result = engine.render_one(job).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output_path.as_deref(), Some(job.output.as_path()));
    assert_eq!(result.metadata.unwrap().triangles, Some(12));
}

#[tokio::test]
async fn single_render_failure_carries_engine_error() {
    let dir = TempDir::new().unwrap();
    let script = "echo '{\"success\": false, \"error\": \"Invalid mesh\"}'\n";
    let engine = engine(dir.path(), script);

    let result = engine.render_one(&jobs(dir.path(), 1)[0]).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Invalid mesh"));
}

#[tokio::test]
async fn single_render_timeout_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.sh");
    std::fs::write(&path, "exec sleep 30\n").unwrap();
    let engine = ScriptEngine::new(EngineConfig {
        interpreter: "sh".to_string(),
        script: path,
        single_timeout_secs: 1,
        ..EngineConfig::default()
    });

    let started = Instant::now();
    let result = engine.render_one(&jobs(dir.path(), 1)[0]).await;
    assert!(!result.success);
    assert!(result.error_message().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn single_render_without_json_reports_stderr() {
    let dir = TempDir::new().unwrap();
    let script = "echo 'no json here'\necho 'ImportError: trimesh' >&2\nexit 1\n";
    let engine = engine(dir.path(), script);

    let result = engine.render_one(&jobs(dir.path(), 1)[0]).await;
    assert!(!result.success);
    assert!(result.error_message().contains("ImportError"));
}

#[tokio::test]
async fn availability_probe_is_cached_until_invalidated() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), "exit 0\n");

    assert!(engine.is_available().await);

    std::fs::remove_file(&engine.config().script).unwrap();
    assert!(engine.is_available().await, "cached answer expected");

    engine.invalidate_availability().await;
    assert!(!engine.is_available().await);
}

#[tokio::test]
async fn missing_interpreter_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("engine.sh");
    std::fs::write(&script, "exit 0\n").unwrap();
    let engine = ScriptEngine::new(EngineConfig {
        interpreter: "definitely-not-an-interpreter".to_string(),
        script,
        ..EngineConfig::default()
    });

    assert!(!engine.is_available().await);
}
