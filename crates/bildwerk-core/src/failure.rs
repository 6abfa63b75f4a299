// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error classification and structured failure reasons.
//
// Every error maps to exactly one `ErrorClass`.  Fatal paths attach a
// `FailureReason` to the image record.

use serde::{Deserialize, Serialize};

use crate::error::BildwerkError;
use crate::types::{ErrorClass, StageKind};

/// Classify a `BildwerkError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &BildwerkError) -> ErrorClass {
    match err {
        // Transient: service hiccups, timeouts, local IO
        BildwerkError::TransientStage { .. } => ErrorClass::Transient,
        BildwerkError::StageTimeout { .. } => ErrorClass::Transient,
        BildwerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::Fatal
            }
            _ => ErrorClass::Transient,
        },

        // Fatal: bad input, bad data, integrity signals
        BildwerkError::Validation(_) => ErrorClass::Fatal,
        BildwerkError::RecordNotFound(_) => ErrorClass::Fatal,
        BildwerkError::FatalStage { .. } => ErrorClass::Fatal,
        BildwerkError::RetriesExhausted { .. } => ErrorClass::Fatal,
        BildwerkError::MalformedOutput { .. } => ErrorClass::Fatal,
        BildwerkError::InvalidTransition(_) => ErrorClass::Fatal,
        BildwerkError::ConditionFailed { .. } => ErrorClass::Fatal,
        BildwerkError::Database(_) => ErrorClass::Fatal,
        BildwerkError::Image(_) => ErrorClass::Fatal,
        BildwerkError::Config(_) => ErrorClass::Fatal,
        BildwerkError::Serialization(_) => ErrorClass::Fatal,
    }
}

/// Reason attached to a `failed` image record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Stage that failed, absent for store-level failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
    /// Short machine-readable kind (e.g. `"retries_exhausted"`).
    pub kind: String,
    pub class: ErrorClass,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl FailureReason {
    pub fn to_json(&self) -> String {
        // Plain struct of strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

/// Convert a `BildwerkError` into the reason stored on the record.
pub fn describe_failure(err: &BildwerkError) -> FailureReason {
    let kind = match err {
        BildwerkError::Validation(_) => "validation",
        BildwerkError::RecordNotFound(_) => "record_not_found",
        BildwerkError::TransientStage { .. } => "transient_stage",
        BildwerkError::FatalStage { .. } => "fatal_stage",
        BildwerkError::StageTimeout { .. } => "stage_timeout",
        BildwerkError::RetriesExhausted { .. } => "retries_exhausted",
        BildwerkError::MalformedOutput { .. } => "malformed_output",
        BildwerkError::InvalidTransition(_) => "invalid_transition",
        BildwerkError::ConditionFailed { .. } => "condition_failed",
        BildwerkError::Database(_) => "database",
        BildwerkError::Image(_) => "image",
        BildwerkError::Config(_) => "config",
        BildwerkError::Io(_) => "io",
        BildwerkError::Serialization(_) => "serialization",
    };

    let attempts = match err {
        BildwerkError::RetriesExhausted { attempts, .. } => Some(*attempts),
        _ => None,
    };

    FailureReason {
        stage: err.stage(),
        kind: kind.into(),
        class: classify_error(err),
        message: err.to_string(),
        attempts,
    }
}
