// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage invocation wrapper: per-call timeout, failure classification, and
// bounded retry with backoff around a single `StageExecutor` call.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use bildwerk_core::error::{BildwerkError, Result};

use crate::retry::{RetryConfig, RetryDecision, should_retry};
use crate::stage::{StageExecutor, StageRequest};

/// Timeout and retry policy applied to every stage call.
#[derive(Debug, Clone)]
pub struct InvokePolicy {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

/// Call `executor` until it succeeds, fails fatally, or runs out of retries.
///
/// Returns the stage output on success.  Fatal failures come back as-is;
/// transient failures that outlast the retry cap become
/// `BildwerkError::RetriesExhausted`.
///
/// A timed-out call is dropped, not awaited.  Executors whose work outlives
/// the dropped future must make the next call for the same image wait for
/// that work.
#[instrument(skip_all, fields(stage = %request.stage, image_key = %request.image_key))]
pub async fn invoke_stage<E: StageExecutor>(
    executor: &E,
    request: &StageRequest,
    policy: &InvokePolicy,
) -> Result<Map<String, Value>> {
    let stage = request.stage;
    let mut attempt: u32 = 0;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout, executor.execute(request)).await {
            Ok(response) => response.into_result(stage),
            Err(_) => Err(BildwerkError::StageTimeout {
                stage,
                after: policy.timeout,
            }),
        };

        let err = match outcome {
            Ok(output) => {
                debug!(attempt, "stage succeeded");
                return Ok(output);
            }
            Err(err) => err,
        };

        warn!(attempt, error = %err, "stage attempt failed");
        match should_retry(&err, attempt, &policy.retry, &request.image_key) {
            RetryDecision::RetryAfter(delay) => {
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            RetryDecision::GiveUp => return Err(err),
            RetryDecision::Exhausted => {
                let attempts = attempt + 1;
                info!(attempts, "giving up on stage");
                return Err(BildwerkError::RetriesExhausted {
                    stage,
                    attempts,
                    last: err.to_string(),
                });
            }
        }
    }
}
