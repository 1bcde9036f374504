//! Step executor that runs configured shell commands.
//!
//! Named operations map to `[executor.operations]` entries; the operation's
//! args are passed as positional parameters, so a command line can use
//! `"$@"` or ignore them. Free-form instructions go to `agent_command` with
//! the instruction text on stdin.
//!
//! A command may print a JSON `StepResult` on stdout (the whole output or
//! its last line). Otherwise the exit status decides: zero is `success`
//! with stdout as the message, anything else is `failure` with stderr.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use phaseflow_core::executor::{StepExecutor, StepExecutorError, StepRequest};
use phaseflow_types::config::ExecutorSettings;
use phaseflow_types::plan::StepPayload;
use phaseflow_types::step::StepResult;
use tokio::io::AsyncWriteExt;

/// Longest message kept from stdout/stderr.
const MAX_MESSAGE_CHARS: usize = 4_000;

/// Runs steps as `sh -c` child processes.
#[derive(Debug, Clone, Default)]
pub struct CommandStepExecutor {
    agent_command: Option<String>,
    operations: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

/// What to spawn for one request.
#[derive(Debug, PartialEq)]
struct Invocation {
    script: String,
    args: Vec<String>,
    stdin: Option<String>,
}

impl CommandStepExecutor {
    pub fn new(settings: &ExecutorSettings) -> Self {
        Self {
            agent_command: settings.agent_command.clone(),
            operations: settings.operations.clone(),
            working_dir: None,
        }
    }

    /// Run every command from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn invocation(&self, request: &StepRequest) -> Result<Invocation, StepExecutorError> {
        match &request.payload {
            StepPayload::NamedOperation { id, args } => {
                let script = self.operations.get(id).ok_or_else(|| {
                    StepExecutorError::Unsupported(format!(
                        "no command configured for operation '/{id}'"
                    ))
                })?;
                Ok(Invocation {
                    script: format!("{script} \"$@\""),
                    args: args.clone(),
                    stdin: request.input.clone(),
                })
            }
            StepPayload::FreeformInstruction { text, context } => {
                let script = self.agent_command.as_ref().ok_or_else(|| {
                    StepExecutorError::Unsupported(format!(
                        "no agent command configured for free-form step '{}'",
                        request.step_id
                    ))
                })?;
                let mut stdin = text.clone();
                for extra in [context.as_deref().or(request.context.as_deref()), request.input.as_deref()]
                    .into_iter()
                    .flatten()
                {
                    stdin.push_str("\n\n");
                    stdin.push_str(extra);
                }
                Ok(Invocation {
                    script: script.clone(),
                    args: Vec::new(),
                    stdin: Some(stdin),
                })
            }
        }
    }
}

impl StepExecutor for CommandStepExecutor {
    fn name(&self) -> &str {
        "command"
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepResult, StepExecutorError> {
        let invocation = self.invocation(request)?;

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&invocation.script)
            .arg("phaseflow")
            .args(&invocation.args)
            .env("PHASEFLOW_RUN_ID", request.run_id.to_string())
            .env("PHASEFLOW_PHASE", &request.phase)
            .env("PHASEFLOW_STEP_ID", &request.step_id)
            .env("PHASEFLOW_ATTEMPT", request.attempt.to_string())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &request.arguments {
            command.env(format!("PHASEFLOW_ARG_{}", key.to_ascii_uppercase()), value);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            StepExecutorError::Spawn(format!("step '{}': {e}", request.step_id))
        })?;

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), invocation.stdin) {
            // A command that exits without reading stdin is not an error.
            stdin.write_all(input.as_bytes()).await.ok();
        }

        tracing::debug!(
            run_id = %request.run_id,
            step_id = %request.step_id,
            attempt = request.attempt,
            "spawned step command"
        );

        // Dropping the wait future on cancel drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(StepExecutorError::Cancelled),
            output = child.wait_with_output() => output.map_err(|e| {
                StepExecutorError::Spawn(format!("step '{}': {e}", request.step_id))
            })?,
        };

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| StepExecutorError::Protocol("stdout is not valid UTF-8".into()))?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Some(result) = parse_result(&stdout)? {
            return Ok(result);
        }

        if output.status.success() {
            Ok(StepResult::success(truncate(stdout.trim())))
        } else {
            let detail = stderr.trim();
            let message = if detail.is_empty() {
                format!("command exited with {}", output.status)
            } else {
                truncate(detail)
            };
            Ok(StepResult::failure(message))
        }
    }
}

/// A JSON `StepResult` printed as the whole of stdout or as its last line.
///
/// Output that looks like a result object (it has a `status` key) but does
/// not parse is a protocol error rather than silently ignored.
fn parse_result(stdout: &str) -> Result<Option<StepResult>, StepExecutorError> {
    let trimmed = stdout.trim();
    let last_line = trimmed.lines().last().unwrap_or_default().trim();

    for candidate in [trimmed, last_line] {
        if !candidate.starts_with('{') {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
            continue;
        };
        if value.get("status").is_none() {
            continue;
        }
        return serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StepExecutorError::Protocol(format!("invalid step result: {e}")));
    }
    Ok(None)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use phaseflow_types::step::StepOutcome;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;

    fn executor(operations: &[(&str, &str)], agent: Option<&str>) -> CommandStepExecutor {
        CommandStepExecutor::new(&ExecutorSettings {
            agent_command: agent.map(str::to_string),
            operations: operations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    fn request(payload: StepPayload) -> StepRequest {
        StepRequest {
            run_id: Uuid::now_v7(),
            phase: "build".into(),
            step_id: "implement".into(),
            name: "Implement".into(),
            payload,
            arguments: BTreeMap::from([("issue".to_string(), "42".to_string())]),
            context: None,
            attempt: 1,
            input: None,
            cancel: CancellationToken::new(),
        }
    }

    fn operation(id: &str, args: &[&str]) -> StepPayload {
        StepPayload::NamedOperation {
            id: id.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn exit_zero_is_success_with_stdout() {
        let exec = executor(&[("greet", "echo hello")], None);
        let result = exec.execute(&request(operation("greet", &["world"]))).await.unwrap();
        assert_eq!(result.status, StepOutcome::Success);
        assert_eq!(result.message, "hello world");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_stderr() {
        let exec = executor(&[("break", "echo broken >&2; exit 3")], None);
        let result = exec.execute(&request(operation("break", &[]))).await.unwrap();
        assert_eq!(result.status, StepOutcome::Failure);
        assert_eq!(result.message, "broken");
    }

    #[tokio::test]
    async fn json_result_on_last_line_wins_over_exit_code() {
        let exec = executor(
            &[(
                "lint",
                r#"echo "checking..."; echo '{"status":"warning","message":"2 lint issues","cost_units":5}'"#,
            )],
            None,
        );
        let result = exec.execute(&request(operation("lint", &[]))).await.unwrap();
        assert_eq!(result.status, StepOutcome::Warning);
        assert_eq!(result.message, "2 lint issues");
        assert_eq!(result.cost_units, Some(5));
    }

    #[tokio::test]
    async fn malformed_result_object_is_a_protocol_error() {
        let exec = executor(&[("bad", r#"echo '{"status":"sideways"}'"#)], None);
        let err = exec.execute(&request(operation("bad", &[]))).await.unwrap_err();
        assert!(matches!(err, StepExecutorError::Protocol(_)));
    }

    #[tokio::test]
    async fn freeform_instruction_goes_to_agent_stdin() {
        let exec = executor(&[], Some("cat"));
        let mut req = request(StepPayload::FreeformInstruction {
            text: "implement issue 42".into(),
            context: None,
        });
        req.input = Some("use the v2 API".into());

        let result = exec.execute(&req).await.unwrap();
        assert_eq!(result.status, StepOutcome::Success);
        assert_eq!(result.message, "implement issue 42\n\nuse the v2 API");
    }

    #[tokio::test]
    async fn step_metadata_is_exported_to_the_environment() {
        let exec = executor(
            &[("env", "echo $PHASEFLOW_STEP_ID $PHASEFLOW_ATTEMPT $PHASEFLOW_ARG_ISSUE")],
            None,
        );
        let result = exec.execute(&request(operation("env", &[]))).await.unwrap();
        assert_eq!(result.message, "implement 1 42");
    }

    #[tokio::test]
    async fn unconfigured_steps_are_unsupported() {
        let exec = executor(&[], None);
        let err = exec.execute(&request(operation("deploy", &[]))).await.unwrap_err();
        assert!(matches!(err, StepExecutorError::Unsupported(ref m) if m.contains("/deploy")));

        let err = exec
            .execute(&request(StepPayload::FreeformInstruction {
                text: "do it".into(),
                context: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, StepExecutorError::Unsupported(_)));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let exec = executor(&[("hang", "sleep 30")], None);
        let req = request(operation("hang", &[]));
        let cancel = req.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(10), exec.execute(&req))
            .await
            .expect("cancelled command should return promptly");
        assert!(matches!(outcome, Err(StepExecutorError::Cancelled)));
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 10);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), MAX_MESSAGE_CHARS + 3);
    }
}
