//! A compiler that runs a build as a sequence of shell commands.
//!
//! The build body looks like:
//!
//! ```json
//! {
//!   "steps": [
//!     {"name": "codegen", "command": "./gen.sh"},
//!     {"name": "bundle", "command": "esbuild", "args": ["src/main.ts"], "env": {"NODE_ENV": "production"}}
//!   ],
//!   "watch": ["src"]
//! }
//! ```
//!
//! Steps run in order in the worker's cwd and the build stops at the first
//! failing step. In watch mode the `watch` paths are polled for changes.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parbuild_core::{BuildConfig, BuildStats};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::hook::ProgressHook;

/// Lines of stderr kept for the error message of a failed step.
const STDERR_TAIL: usize = 20;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Deserialize)]
struct Step {
    name: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandBody {
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    watch: Vec<PathBuf>,
}

/// Modification state of every file under the watched paths.
type Snapshot = BTreeMap<PathBuf, (Option<SystemTime>, u64)>;

struct StepOutput {
    status: ExitStatus,
    warnings: Vec<String>,
    stderr_tail: Vec<String>,
}

/// Runs the `steps` of a build config as child processes.
#[derive(Debug)]
pub struct CommandCompiler {
    steps: Vec<Step>,
    watch_paths: Vec<PathBuf>,
    cwd: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    baseline: Option<Snapshot>,
}

impl CommandCompiler {
    /// Build a compiler from a resolved build config.
    pub fn from_config(build: &BuildConfig, cwd: &Path) -> Result<Self, CompileError> {
        let body: CommandBody = serde_json::from_value(Value::Object(build.body.clone()))
            .map_err(|e| CompileError::InvalidConfig(format!("build '{}': {e}", build.name)))?;

        Ok(Self {
            steps: body.steps,
            watch_paths: body.watch.into_iter().map(|p| cwd.join(p)).collect(),
            cwd: cwd.to_path_buf(),
            poll_interval: POLL_INTERVAL,
            debounce: DEBOUNCE,
            baseline: None,
        })
    }

    /// Override the change polling cadence.
    pub fn with_timing(mut self, poll_interval: Duration, debounce: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.debounce = debounce;
        self
    }

    async fn run_step(&self, step: &Step) -> Result<StepOutput, CompileError> {
        let mut child = Command::new(&step.command)
            .args(&step.args)
            .envs(&step.env)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (forwarded, collected) =
            tokio::join!(forward_stdout(stdout), collect_stderr(stderr));
        forwarded?;
        let (warnings, stderr_tail) = collected?;

        let status = child.wait().await?;
        Ok(StepOutput {
            status,
            warnings,
            stderr_tail,
        })
    }

    async fn snapshot(&self) -> Result<Snapshot, CompileError> {
        let paths = self.watch_paths.clone();
        tokio::task::spawn_blocking(move || snapshot_paths(&paths))
            .await
            .map_err(|e| CompileError::Failed(format!("watch scan failed: {e}")))?
            .map_err(CompileError::from)
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn compile(&mut self, progress: &ProgressHook) -> Result<BuildStats, CompileError> {
        if !self.watch_paths.is_empty() {
            self.baseline = Some(self.snapshot().await?);
        }

        let total = self.steps.len();
        let mut stats = BuildStats::default();

        for (i, step) in self.steps.iter().enumerate() {
            progress.report(i as f64 / total as f64, "building", &step.name, &step.command);
            stats.modules.push(step.name.clone());
            debug!(step = %step.name, command = %step.command, "Running build step");

            let output = match self.run_step(step).await {
                Ok(output) => output,
                Err(e) => {
                    stats
                        .errors
                        .push(format!("{}: cannot run '{}': {e}", step.name, step.command));
                    break;
                }
            };

            if output.status.success() {
                stats.warnings.extend(output.warnings);
                continue;
            }

            let mut error = format!("{}: {} ({})", step.name, step.command, output.status);
            for line in output.stderr_tail {
                error.push('\n');
                error.push_str(&line);
            }
            stats.errors.push(error);
            break;
        }

        stats.filtered_modules = total - stats.modules.len();
        progress.report(1.0, "done", "", "");
        info!(
            steps = stats.modules.len(),
            errors = stats.errors.len(),
            "Build steps finished"
        );
        Ok(stats)
    }

    async fn wait_for_change(&mut self) -> Result<(), CompileError> {
        if self.watch_paths.is_empty() {
            return std::future::pending().await;
        }

        let baseline = match self.baseline.take() {
            Some(snapshot) => snapshot,
            None => self.snapshot().await?,
        };

        let mut current = loop {
            tokio::time::sleep(self.poll_interval).await;
            let current = self.snapshot().await?;
            if current != baseline {
                break current;
            }
        };

        // Wait for a quiet window before rebuilding.
        loop {
            tokio::time::sleep(self.debounce).await;
            let next = self.snapshot().await?;
            if next == current {
                break;
            }
            current = next;
        }

        debug!(files = current.len(), "Watched files changed");
        Ok(())
    }
}

async fn forward_stdout<R>(stdout: Option<R>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(stdout) = stdout else {
        return Ok(());
    };
    let mut lines = BufReader::new(stdout).lines();
    let mut sink = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        sink.write_all(line.as_bytes()).await?;
        sink.write_all(b"\n").await?;
        sink.flush().await?;
    }
    Ok(())
}

/// Forward stderr, keeping the warnings and the last few lines.
async fn collect_stderr<R>(stderr: Option<R>) -> io::Result<(Vec<String>, Vec<String>)>
where
    R: AsyncRead + Unpin,
{
    let mut warnings = Vec::new();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let Some(stderr) = stderr else {
        return Ok((warnings, Vec::new()));
    };

    let mut lines = BufReader::new(stderr).lines();
    let mut sink = tokio::io::stderr();
    while let Some(line) = lines.next_line().await? {
        sink.write_all(line.as_bytes()).await?;
        sink.write_all(b"\n").await?;
        sink.flush().await?;

        if line.to_lowercase().contains("warning") {
            warnings.push(line.clone());
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Ok((warnings, tail.into()))
}

fn snapshot_paths(paths: &[PathBuf]) -> io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut pending: Vec<PathBuf> = paths.to_vec();

    while let Some(path) = pending.pop() {
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            for entry in std::fs::read_dir(&path)? {
                pending.push(entry?.path());
            }
        } else {
            snapshot.insert(path, (metadata.modified().ok(), metadata.len()));
        }
    }
    Ok(snapshot)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parbuild_core::{Event, Progress};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn build(body: Value) -> BuildConfig {
        match body {
            Value::Object(map) => BuildConfig::new("web", map),
            other => panic!("not an object: {other}"),
        }
    }

    fn hook() -> (ProgressHook, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressHook::new(tx), rx)
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = build(json!({
            "steps": [
                {"name": "gen", "command": "sh", "args": ["-c", "echo generated > out.txt"]},
                {"name": "check", "command": "sh", "args": ["-c", "echo 'warning: unused import' >&2; test -f out.txt"]},
            ]
        }));
        let mut compiler = CommandCompiler::from_config(&config, dir.path()).unwrap();
        let (hook, mut rx) = hook();

        let stats = compiler.compile(&hook).await.unwrap();

        assert!(stats.is_success(), "{:?}", stats.errors);
        assert_eq!(stats.modules, vec!["gen".to_string(), "check".to_string()]);
        assert_eq!(stats.warnings, vec!["warning: unused import".to_string()]);
        assert_eq!(stats.filtered_modules, 0);

        let mut reports = Vec::new();
        while let Ok(Event::Progress(p)) = rx.try_recv() {
            reports.push(p);
        }
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].percent, 0.5);
        assert_eq!(reports[1].step, "check");
        assert!(reports[2].same_report(&Progress::done()));
    }

    #[tokio::test]
    async fn test_failing_step_stops_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = build(json!({
            "steps": [
                {"name": "lint", "command": "sh", "args": ["-c", "echo 'src/app.ts: bad' >&2; exit 3"]},
                {"name": "bundle", "command": "true"},
            ]
        }));
        let mut compiler = CommandCompiler::from_config(&config, dir.path()).unwrap();
        let (hook, _rx) = hook();

        let stats = compiler.compile(&hook).await.unwrap();

        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].starts_with("lint: sh"));
        assert!(stats.errors[0].contains("src/app.ts: bad"));
        assert_eq!(stats.modules, vec!["lint".to_string()]);
        assert_eq!(stats.filtered_modules, 1);
    }

    #[tokio::test]
    async fn test_missing_command_is_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = build(json!({
            "steps": [{"name": "x", "command": "/nonexistent/parbuild-test-binary"}]
        }));
        let mut compiler = CommandCompiler::from_config(&config, dir.path()).unwrap();
        let (hook, _rx) = hook();

        let stats = compiler.compile(&hook).await.unwrap();
        assert!(stats.errors[0].contains("cannot run"));
    }

    #[test]
    fn test_unknown_body_keys_rejected() {
        let config = build(json!({"stepz": []}));
        let err = CommandCompiler::from_config(&config, Path::new(".")).unwrap_err();
        assert!(matches!(err, CompileError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_wait_for_change_settles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let config = build(json!({"steps": [], "watch": ["src"]}));
        let mut compiler = CommandCompiler::from_config(&config, dir.path())
            .unwrap()
            .with_timing(Duration::from_millis(20), Duration::from_millis(50));
        let (hook, _rx) = hook();
        compiler.compile(&hook).await.unwrap();

        let src = dir.path().join("src");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(src.join("main.ts"), "export {}").unwrap();
        });

        tokio::time::timeout(Duration::from_secs(5), compiler.wait_for_change())
            .await
            .expect("no change detected")
            .unwrap();
    }
}
