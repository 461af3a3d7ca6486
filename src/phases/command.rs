//! External process adapter.
//!
//! The child receives `{"stage": ..., "state": ...}` as JSON on stdin and
//! must print a `SessionStateDelta` as JSON on stdout. Output wrapped in a
//! fenced ```json block (typical for LLM wrappers) is accepted as well.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::CapabilityError;
use crate::models::{SessionState, SessionStateDelta, StageId};

use super::AgentAdapter;

#[derive(Serialize)]
struct CommandRequest<'a> {
    stage: StageId,
    state: &'a SessionState,
}

pub struct ExternalCommandAdapter {
    program: String,
    args: Vec<String>,
}

impl ExternalCommandAdapter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Abandoned calls (timeout, cancel) must not leave the child running
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentAdapter for ExternalCommandAdapter {
    async fn invoke(
        &self,
        stage: StageId,
        state: &SessionState,
    ) -> Result<SessionStateDelta, CapabilityError> {
        let request = serde_json::to_vec(&CommandRequest { stage, state })
            .map_err(|e| CapabilityError::failed(stage, format!("failed to encode request: {}", e)))?;

        debug!("Spawning {} {:?} for {} stage", self.program, self.args, stage);
        let mut child = self.build_command().spawn().map_err(|e| {
            CapabilityError::failed(stage, format!("failed to spawn '{}': {}", self.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&request).await {
                Ok(()) => {}
                // The child may exit without reading its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", self.program)
                }
                Err(e) => {
                    return Err(CapabilityError::failed(
                        stage,
                        format!("failed to write request: {}", e),
                    ));
                }
            }
            // Dropping stdin closes the pipe so the child sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityError::failed(stage, format!("failed to wait for child: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::failed(
                stage,
                format!("'{}' exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let body = delta_json(&stdout)
            .ok_or_else(|| CapabilityError::failed(stage, "no JSON object on stdout"))?;
        serde_json::from_str(body)
            .map_err(|e| CapabilityError::failed(stage, format!("invalid delta JSON: {}", e)))
    }
}

/// Locate the delta JSON in process output: a fenced ```json block if
/// present, otherwise the span from the first `{` to the last `}`.
fn delta_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_json_from_fenced_block() {
        let text = "thinking...\n```json\n{\"author\": \"safety\", \"base_version\": 1}\n```\n";
        assert_eq!(
            delta_json(text),
            Some("{\"author\": \"safety\", \"base_version\": 1}")
        );
    }

    #[test]
    fn test_delta_json_raw_and_missing() {
        assert_eq!(delta_json("log line\n{\"a\": {\"b\": 1}}\n"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(delta_json("no json here"), None);
        assert_eq!(delta_json("} {"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_adapter_round_trip() {
        let script = r#"cat > /dev/null; echo '{"author":"critic","base_version":0,"metrics":{"empathy_score":0.9}}'"#;
        let adapter = ExternalCommandAdapter::new("sh", vec!["-c".to_string(), script.to_string()]);
        let state = SessionState::new("x".to_string(), "p".to_string(), "ollama".to_string());

        let delta = adapter.invoke(StageId::Critic, &state).await.unwrap();
        assert_eq!(delta.author, StageId::Critic);
        assert_eq!(delta.metrics["empathy_score"], 0.9);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_adapter_failure_reports_stderr() {
        let adapter = ExternalCommandAdapter::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; echo boom >&2; exit 3".to_string()],
        );
        let state = SessionState::new("x".to_string(), "p".to_string(), "ollama".to_string());

        let err = adapter.invoke(StageId::Safety, &state).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
