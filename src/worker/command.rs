//! Command Worker
//!
//! Runs an external command once per payload. The payload is written as JSON
//! on the child's stdin and the exit status decides the outcome:
//!
//! | exit code | outcome |
//! | --- | --- |
//! | 0 | processed |
//! | 75 (`EX_TEMPFAIL`) | requeue |
//! | 69 (`EX_UNAVAILABLE`) | suspend the queue |
//! | anything else | failed |

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use super::{QueueWorker, WorkerOutcome};

/// Exit code asking for immediate redelivery
pub const EXIT_REQUEUE: i32 = 75;

/// Exit code suspending the queue for the current pass
pub const EXIT_SUSPEND: i32 = 69;

/// Maximum captured stderr kept in outcomes (4KB)
const MAX_STDERR: usize = 4 * 1024;

/// Worker that pipes each payload into a subprocess
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
}

impl CommandWorker {
    /// Build from `[program, args...]`
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("worker command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    async fn run(&self, data: &serde_json::Value) -> anyhow::Result<std::process::Output> {
        let payload = serde_json::to_vec(data).context("Failed to encode payload")?;

        let mut child = TokioCommand::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn worker command: {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading stdin is not an error
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Worker stdin closed early: {}", e);
            }
        }

        child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for worker command: {}", self.program))
    }
}

#[async_trait]
impl QueueWorker for CommandWorker {
    async fn process_item(&self, data: &serde_json::Value) -> WorkerOutcome {
        let output = match self.run(data).await {
            Ok(output) => output,
            Err(e) => return WorkerOutcome::Failed(e),
        };

        let stderr = stderr_excerpt(&output.stderr);
        match output.status.code() {
            Some(0) => WorkerOutcome::Processed,
            Some(EXIT_REQUEUE) => WorkerOutcome::Requeue,
            Some(EXIT_SUSPEND) => WorkerOutcome::Suspend(if stderr.is_empty() {
                format!("{} reported the queue unavailable", self.program)
            } else {
                stderr
            }),
            code => WorkerOutcome::Failed(anyhow!(
                "{} exited with {:?}: {}",
                self.program,
                code,
                stderr
            )),
        }
    }
}

fn stderr_excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= MAX_STDERR {
        return text.to_string();
    }
    let mut end = MAX_STDERR;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}
