use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::CodingError;

const TAIL_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub total_timeout: Duration,
    pub no_output_timeout: Duration,
}

impl StreamSettings {
    /// The no-output budget is 90% of the total: a healthy external tool
    /// keeps printing; one that goes quiet for that long has hung.
    pub fn from_total_secs(total_secs: u64) -> Self {
        Self {
            total_timeout: Duration::from_secs(total_secs),
            no_output_timeout: Duration::from_millis(total_secs * 900),
        }
    }
}

/// Drive a long-lived subprocess to completion, streaming both pipes.
/// Any output line resets the no-output timer; expiry of either timer
/// kills the process. Returns the accumulated output tail on success so
/// callers can log it.
pub async fn run_streaming(
    mut command: Command,
    settings: StreamSettings,
) -> Result<String, CodingError> {
    // A cancelled attempt must not leave the external tool running.
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| CodingError::Failed(format!("Failed to spawn: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CodingError::Failed("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CodingError::Failed("stderr not captured".to_string()))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut accumulated = String::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    let total_deadline = tokio::time::Instant::now() + settings.total_timeout;
    let mut no_output_deadline = tokio::time::Instant::now() + settings.no_output_timeout;

    while !stdout_done || !stderr_done {
        tokio::select! {
            biased;
            result = stdout_lines.next_line(), if !stdout_done => {
                match result {
                    Ok(Some(line)) => {
                        tracing::debug!(target: "coding_agent", "{line}");
                        no_output_deadline =
                            tokio::time::Instant::now() + settings.no_output_timeout;
                        push_line(&mut accumulated, &line);
                    }
                    _ => stdout_done = true,
                }
            }
            result = stderr_lines.next_line(), if !stderr_done => {
                match result {
                    Ok(Some(line)) => {
                        tracing::warn!(target: "coding_agent", "{line}");
                        no_output_deadline =
                            tokio::time::Instant::now() + settings.no_output_timeout;
                        push_line(&mut accumulated, &line);
                    }
                    _ => stderr_done = true,
                }
            }
            _ = tokio::time::sleep_until(total_deadline) => {
                let _ = child.kill().await;
                return Err(CodingError::Timeout(format!(
                    "process exceeded {}s total timeout",
                    settings.total_timeout.as_secs()
                )));
            }
            _ = tokio::time::sleep_until(no_output_deadline) => {
                let _ = child.kill().await;
                return Err(CodingError::Timeout(format!(
                    "no output for {}s, process appears hung",
                    settings.no_output_timeout.as_secs()
                )));
            }
        }
    }

    let status = tokio::time::timeout_at(total_deadline, child.wait())
        .await
        .map_err(|_| {
            CodingError::Timeout(format!(
                "process exceeded {}s total timeout",
                settings.total_timeout.as_secs()
            ))
        })?
        .map_err(|e| CodingError::Failed(format!("Failed to reap process: {e}")))?;

    if status.success() {
        Ok(accumulated)
    } else {
        let code = status.code().unwrap_or(-1);
        Err(CodingError::Failed(format!(
            "exit code {code}; output tail:\n{}",
            tail(&accumulated)
        )))
    }
}

fn push_line(accumulated: &mut String, line: &str) {
    if !accumulated.is_empty() {
        accumulated.push('\n');
    }
    accumulated.push_str(line);
}

fn tail(output: &str) -> &str {
    if output.len() <= TAIL_BYTES {
        return output;
    }
    let start = output.len() - TAIL_BYTES;
    // Snap to a char boundary.
    let mut idx = start;
    while !output.is_char_boundary(idx) {
        idx += 1;
    }
    &output[idx..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn settings(total_ms: u64, no_output_ms: u64) -> StreamSettings {
        StreamSettings {
            total_timeout: Duration::from_millis(total_ms),
            no_output_timeout: Duration::from_millis(no_output_ms),
        }
    }

    #[tokio::test]
    async fn successful_command_returns_output() {
        let output = run_streaming(sh("echo one; echo two 1>&2"), settings(5000, 4000))
            .await
            .unwrap();
        assert!(output.contains("one"));
        assert!(output.contains("two"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let err = run_streaming(sh("echo boom; exit 3"), settings(5000, 4000))
            .await
            .unwrap_err();
        match err {
            CodingError::Failed(msg) => {
                assert!(msg.contains("exit code 3"));
                assert!(msg.contains("boom"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn total_timeout_kills_process() {
        let err = run_streaming(sh("sleep 30"), settings(200, 10_000))
            .await
            .unwrap_err();
        assert!(matches!(err, CodingError::Timeout(_)));
    }

    #[tokio::test]
    async fn silence_trips_no_output_timeout() {
        // The process stays alive well past the no-output window.
        let err = run_streaming(sh("echo start; sleep 30"), settings(10_000, 300))
            .await
            .unwrap_err();
        match err {
            CodingError::Timeout(msg) => assert!(msg.contains("no output")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn output_resets_no_output_timer() {
        // Each tick lands inside the 400ms no-output window, so the whole
        // 1s run must survive despite no_output < total runtime.
        let script = "for i in 1 2 3 4 5; do echo tick $i; sleep 0.2; done";
        let output = run_streaming(sh(script), settings(10_000, 500))
            .await
            .unwrap();
        assert!(output.contains("tick 5"));
    }

    #[test]
    fn default_derivation_is_ninety_percent() {
        let settings = StreamSettings::from_total_secs(600);
        assert_eq!(settings.total_timeout, Duration::from_secs(600));
        assert_eq!(settings.no_output_timeout, Duration::from_secs(540));
    }
}
