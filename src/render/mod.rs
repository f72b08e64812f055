//! Render adapter over the external templating tool
//!
//! The boundary to the excluded collaborator: `helm template` (or an
//! equivalent binary) is invoked per chart as a subprocess with a bounded
//! timeout. A non-zero exit or a timeout is a render failure, not an error
//! of the validator itself; the orchestrator turns it into a single
//! critical violation for the chart.

use crate::domain::violations::{SentryError, SentryResult};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default render timeout per chart
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Outcome of rendering one chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Combined rendered text of all templates, with inline source markers
    Rendered(String),
    /// Render failure diagnostic (stderr or timeout note)
    Failed(String),
}

/// Boundary trait so the orchestrator can be exercised without a real
/// templating binary on PATH.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        chart_dir: &Path,
        values: &[PathBuf],
        env: Option<&str>,
    ) -> SentryResult<RenderOutcome>;
}

/// Renders charts by shelling out to a `helm`-compatible binary
#[derive(Debug, Clone)]
pub struct HelmRenderer {
    binary: String,
    timeout: Duration,
}

impl HelmRenderer {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }
}

impl Default for HelmRenderer {
    fn default() -> Self {
        Self::new("helm", DEFAULT_TIMEOUT)
    }
}

impl Renderer for HelmRenderer {
    fn render(
        &self,
        chart_dir: &Path,
        values: &[PathBuf],
        env: Option<&str>,
    ) -> SentryResult<RenderOutcome> {
        let mut command = Command::new(&self.binary);
        command.arg("template").arg(chart_dir);
        for values_file in values {
            command.arg("-f").arg(values_file);
        }
        if let Some(env) = env {
            command.arg("--set").arg(format!("global.env={env}"));
        }
        command
            .current_dir(chart_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!("Rendering {} with '{}'", chart_dir.display(), self.binary);

        let mut child = command.spawn().map_err(|e| {
            SentryError::render(
                chart_dir.display().to_string(),
                format!("failed to launch '{}': {}", self.binary, e),
            )
        })?;

        // Drain both pipes off-thread so a chatty template cannot deadlock
        // the timeout loop.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_reader(stdout_reader);
                    join_reader(stderr_reader);
                    return Ok(RenderOutcome::Failed(format!(
                        "render timed out after {}s",
                        self.timeout.as_secs()
                    )));
                }
                None => thread::sleep(Duration::from_millis(25)),
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        if status.success() {
            Ok(RenderOutcome::Rendered(stdout))
        } else {
            let diagnostic = if stderr.trim().is_empty() {
                format!("render exited with {status}")
            } else {
                stderr
            };
            Ok(RenderOutcome::Failed(diagnostic))
        }
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_successful_render_captures_stdout() {
        let temp_dir = TempDir::new().unwrap();
        let renderer = HelmRenderer::new("echo", Duration::from_secs(5));

        let outcome = renderer.render(temp_dir.path(), &[], None).unwrap();

        match outcome {
            RenderOutcome::Rendered(text) => assert!(text.contains("template")),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_nonzero_exit_is_a_failure_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let renderer = HelmRenderer::new("false", Duration::from_secs(5));

        let outcome = renderer.render(temp_dir.path(), &[], None).unwrap();
        assert!(matches!(outcome, RenderOutcome::Failed(_)));
    }

    #[test]
    fn test_missing_binary_is_a_render_error() {
        let temp_dir = TempDir::new().unwrap();
        let renderer =
            HelmRenderer::new("definitely-not-a-real-binary-42", Duration::from_secs(5));

        let result = renderer.render(temp_dir.path(), &[], None);
        assert!(matches!(result, Err(SentryError::Render { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_subprocess() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("slow-helm");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let renderer =
            HelmRenderer::new(script.to_string_lossy(), Duration::from_millis(200));
        let started = Instant::now();
        let outcome = renderer.render(temp_dir.path(), &[], None).unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        match outcome {
            RenderOutcome::Failed(diag) => assert!(diag.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[test]
    fn test_env_and_values_are_forwarded() {
        let temp_dir = TempDir::new().unwrap();
        let renderer = HelmRenderer::new("echo", Duration::from_secs(5));
        let values = vec![PathBuf::from("values-prod.yaml")];

        let outcome = renderer.render(temp_dir.path(), &values, Some("prod")).unwrap();

        match outcome {
            RenderOutcome::Rendered(text) => {
                assert!(text.contains("values-prod.yaml"));
                assert!(text.contains("global.env=prod"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
