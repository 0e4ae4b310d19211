//! Analysis hooks invoked on data records
//!
//! The device does no analysis itself. Whatever runs on a data record is an
//! [`AnalysisHook`]: a closure for in-process work, or a [`CommandHook`] that
//! hands the payload to an external analyzer program (an object detector,
//! say) and captures what it prints.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Placeholder in a command's arguments replaced by the payload file path
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Errors raised by analysis hooks
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to stage analyzer input: {0}")]
    Input(#[source] std::io::Error),
    #[error("Failed to launch analyzer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Analyzer exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("{0}")]
    Rejected(String),
}

/// Capability invoked with the value of every data record
#[async_trait]
pub trait AnalysisHook: Send + Sync {
    /// Analyze one record value; the returned text is informational
    async fn analyze(&self, value: &[u8]) -> Result<String, AnalysisError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "analysis"
    }
}

#[async_trait]
impl<F> AnalysisHook for F
where
    F: Fn(&[u8]) -> Result<String, AnalysisError> + Send + Sync,
{
    async fn analyze(&self, value: &[u8]) -> Result<String, AnalysisError> {
        self(value)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Runs an external analyzer program per record.
///
/// If any argument contains `{input}`, the payload is written to
/// `input_path` and the placeholder replaced by that path. Otherwise the
/// payload is piped to the program's stdin. Stdout is the result.
#[derive(Debug, Clone)]
pub struct CommandHook {
    program: String,
    args: Vec<String>,
    input_path: PathBuf,
}

impl CommandHook {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let input_path = std::env::temp_dir().join(format!(
            "edgeserve-analysis-{}.bin",
            std::process::id()
        ));
        Self {
            program,
            args,
            input_path,
        }
    }

    /// Build from a `[program, args...]` list; `None` if the list is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_input_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = path.into();
        self
    }

    fn uses_input_file(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(INPUT_PLACEHOLDER))
    }

    fn resolved_args(&self) -> Vec<String> {
        let path = self.input_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &path))
            .collect()
    }
}

#[async_trait]
impl AnalysisHook for CommandHook {
    async fn analyze(&self, value: &[u8]) -> Result<String, AnalysisError> {
        let via_file = self.uses_input_file();
        if via_file {
            tokio::fs::write(&self.input_path, value)
                .await
                .map_err(AnalysisError::Input)?;
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.resolved_args())
            .stdin(if via_file {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| AnalysisError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        // Stdin is fed concurrently with draining stdout and stderr
        let stdin = child.stdin.take();
        let program = self.program.as_str();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(value).await {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(program = %program, "Analyzer closed stdin before reading all input");
                    Ok(())
                }
                // Dropping stdin here lets the analyzer see EOF
                result => result,
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| AnalysisError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        fed.map_err(AnalysisError::Input)?;

        debug!(
            program = %self.program,
            bytes = value.len(),
            status = %output.status,
            "Analyzer finished"
        );

        if !output.status.success() {
            return Err(AnalysisError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_hook() {
        let hook = |value: &[u8]| -> Result<String, AnalysisError> {
            Ok(format!("{} bytes", value.len()))
        };
        assert_eq!(hook.analyze(b"frame").await.unwrap(), "5 bytes");
    }

    #[tokio::test]
    async fn test_closure_hook_rejects() {
        let hook = |_: &[u8]| -> Result<String, AnalysisError> {
            Err(AnalysisError::Rejected("unsupported codec".to_string()))
        };
        let err = hook.analyze(b"frame").await.unwrap_err();
        assert_eq!(err.to_string(), "unsupported codec");
    }

    #[test]
    fn test_from_empty_command() {
        assert!(CommandHook::from_command(&[]).is_none());
    }

    #[test]
    fn test_placeholder_substitution() {
        let hook = CommandHook::from_command(&[
            "detect".to_string(),
            "--source".to_string(),
            "{input}".to_string(),
        ])
        .unwrap()
        .with_input_path("/tmp/clip.mp4");

        assert!(hook.uses_input_file());
        assert_eq!(hook.resolved_args(), vec!["--source", "/tmp/clip.mp4"]);
        assert_eq!(hook.name(), "detect");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_reads_stdin() {
        let hook = CommandHook::new("cat", Vec::new());
        let output = hook.analyze(b"hand.jpg bytes").await.unwrap();
        assert_eq!(output, "hand.jpg bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_reads_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        let hook = CommandHook::new("cat", vec![INPUT_PLACEHOLDER.to_string()])
            .with_input_path(&path);

        let output = hook.analyze(b"video").await.unwrap();
        assert_eq!(output, "video");
        assert_eq!(std::fs::read(&path).unwrap(), b"video");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_failure_status() {
        let hook = CommandHook::new("false", Vec::new());
        let err = hook.analyze(b"").await.unwrap_err();
        assert!(matches!(err, AnalysisError::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_large_output_before_reading_input() {
        let hook = CommandHook::new(
            "sh",
            vec![
                "-c".to_string(),
                "yes | head -c 1000000; cat >/dev/null".to_string(),
            ],
        );
        let payload = vec![b'f'; 1_000_000];

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            hook.analyze(&payload),
        )
        .await
        .expect("analyzer and agent deadlocked on pipes")
        .unwrap();
        assert_eq!(output.len(), 1_000_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_ignoring_stdin() {
        let hook = CommandHook::new("sh", vec!["-c".to_string(), "echo skipped".to_string()]);
        let payload = vec![b'f'; 1_000_000];

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            hook.analyze(&payload),
        )
        .await
        .expect("analyze should finish once the analyzer exits")
        .unwrap();
        assert_eq!(output, "skipped\n");
    }

    #[tokio::test]
    async fn test_command_hook_missing_program() {
        let hook = CommandHook::new("edgeserve-no-such-analyzer", Vec::new());
        let err = hook.analyze(b"").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Spawn { .. }));
    }
}
