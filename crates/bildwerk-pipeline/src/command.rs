// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External-process stage executor.
//
// The stage program receives the request as JSON on stdin and prints one
// JSON response on stdout.  Anything it writes to stderr is logged.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use bildwerk_core::error::BildwerkError;
use bildwerk_core::failure::classify_error;

use crate::stage::{StageExecutor, StageRequest, StageResponse};

/// Runs a stage as a child process.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn call(&self, request: &StageRequest) -> Result<std::process::Output, BildwerkError> {
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading its input is judged by
            // its output, not by the broken pipe.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "stage program closed stdin early");
            }
        }

        Ok(child.wait_with_output().await?)
    }
}

fn io_failure(err: &BildwerkError) -> StageResponse {
    StageResponse::failure(classify_error(err), err.to_string())
}

impl StageExecutor for CommandExecutor {
    #[instrument(skip_all, fields(program = %self.program, stage = %request.stage))]
    async fn execute(&self, request: &StageRequest) -> StageResponse {
        let output = match self.call(request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "could not run stage program");
                return io_failure(&e);
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "stage program stderr");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return StageResponse::transient(format!(
                "{} produced no response ({})",
                self.program, output.status
            ));
        }

        match serde_json::from_str::<StageResponse>(stdout.trim()) {
            Ok(response) => response,
            Err(e) => StageResponse::fatal(format!(
                "{} printed an unreadable response: {e}",
                self.program
            )),
        }
    }
}
