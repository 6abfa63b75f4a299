// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Bildwerk.

use std::time::Duration;

use thiserror::Error;

use crate::types::StageKind;

/// Top-level error type for all Bildwerk operations.
#[derive(Debug, Error)]
pub enum BildwerkError {
    // -- Trigger errors --
    #[error("invalid trigger event: {0}")]
    Validation(String),

    #[error("no image record for key {0}")]
    RecordNotFound(String),

    // -- Stage errors --
    #[error("{stage} stage failed (transient): {detail}")]
    TransientStage { stage: StageKind, detail: String },

    #[error("{stage} stage failed: {detail}")]
    FatalStage { stage: StageKind, detail: String },

    #[error("{stage} stage timed out after {}ms", after.as_millis())]
    StageTimeout { stage: StageKind, after: Duration },

    #[error("{stage} stage gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        stage: StageKind,
        attempts: u32,
        last: String,
    },

    #[error("{stage} stage returned malformed output: {detail}")]
    MalformedOutput { stage: StageKind, detail: String },

    #[error("invalid workflow transition: {0}")]
    InvalidTransition(String),

    // -- Status store --
    #[error("status update rejected for {image_key}: {detail}")]
    ConditionFailed { image_key: String, detail: String },

    #[error("database error: {0}")]
    Database(String),

    // -- Local transforms --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BildwerkError {
    /// The pipeline stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::TransientStage { stage, .. }
            | Self::FatalStage { stage, .. }
            | Self::StageTimeout { stage, .. }
            | Self::RetriesExhausted { stage, .. }
            | Self::MalformedOutput { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BildwerkError>;
