use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};

pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum RunFailure {
    Spawn(String),
    Timeout,
}

/// Run a command to completion, killing it once `timeout` has elapsed.
///
/// The deadline covers feeding `stdin` and reading both output pipes to EOF,
/// so a helper process that keeps stdout open past its parent cannot stall
/// the caller. The caller must have configured `Stdio::piped()` for stdin
/// when passing input.
pub async fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<String>,
    timeout: Duration,
) -> Result<CommandOutput, RunFailure> {
    cmd.kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| RunFailure::Spawn(e.to_string()))?;
    let pipe = child.stdin.take();
    let feed = async move {
        if let (Some(mut pipe), Some(input)) = (pipe, stdin) {
            // a child that exits without reading its input is not an error here
            let _ = pipe.write_all(input.as_bytes()).await;
        }
    };

    let run = async move {
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        output
    };
    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| RunFailure::Timeout)?
        .map_err(|e| RunFailure::Spawn(e.to_string()))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Blocking entry point for callers on `spawn_blocking` workers or plain
/// threads. Uses the ambient runtime when there is one.
pub fn run_blocking(
    cmd: Command,
    stdin: Option<String>,
    timeout: Duration,
) -> Result<CommandOutput, RunFailure> {
    block_on(run_with_timeout(cmd, stdin, timeout))
}

fn block_on<F>(future: F) -> Result<CommandOutput, RunFailure>
where
    F: Future<Output = Result<CommandOutput, RunFailure>>,
{
    match Handle::try_current() {
        Ok(handle) => handle.block_on(future),
        Err(_) => Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RunFailure::Spawn(format!("failed to start runtime: {e}")))?
            .block_on(future),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    use tokio::process::Command;

    use super::{run_blocking, run_with_timeout, RunFailure};

    #[cfg(unix)]
    #[tokio::test]
    async fn feeds_stdin_and_captures_stdout() {
        let mut cmd = Command::new("cat");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = run_with_timeout(cmd, Some("hello".to_string()), Duration::from_secs(5))
            .await
            .expect("cat should run");
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kills_commands_past_the_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5").stdout(Stdio::piped()).stderr(Stdio::piped());
        let result = run_with_timeout(cmd, None, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(RunFailure::Timeout)));
    }

    #[cfg(unix)]
    #[test]
    fn lingering_grandchild_holding_stdout_hits_the_deadline() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("sleep 5 & echo started")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let started = Instant::now();
        let result = run_blocking(cmd, None, Duration::from_millis(300));
        assert!(matches!(result, Err(RunFailure::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_callers_reuse_the_ambient_runtime() {
        let output = tokio::task::spawn_blocking(|| {
            let mut cmd = Command::new("echo");
            cmd.arg("ok").stdout(Stdio::piped()).stderr(Stdio::piped());
            run_blocking(cmd, None, Duration::from_secs(5))
        })
        .await
        .expect("worker joins")
        .expect("echo should run");
        assert_eq!(output.stdout.trim(), "ok");
    }

    #[test]
    fn reports_spawn_failures() {
        let cmd = Command::new("definitely-not-a-real-binary-4821");
        let result = run_blocking(cmd, None, Duration::from_secs(1));
        assert!(matches!(result, Err(RunFailure::Spawn(_))));
    }
}
