// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage executor contract.
//
// Every external transform (resize, moderate, detect-faces, crop, censor) is
// reached through the same request/response shape.  The orchestrator only
// knows this trait.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{BoundingBox, CropArea, ErrorClass, StageKind};

/// Outputs of earlier stages that later stages need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resized_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_boxes: Option<Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_area: Option<CropArea>,
}

/// One stage call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRequest {
    pub stage: StageKind,
    pub image_key: String,
    pub bucket: String,
    pub context: ExecutionContext,
    /// Stage-specific settings (e.g. `minConfidence` for moderation).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

/// What a stage reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResponse {
    pub ok: bool,
    #[serde(default)]
    pub output: Map<String, Value>,
    /// Only meaningful when `ok` is false.  Absent means transient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageResponse {
    pub fn success(output: Map<String, Value>) -> Self {
        Self {
            ok: true,
            output,
            error_kind: None,
            message: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::failure(ErrorClass::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::failure(ErrorClass::Fatal, message)
    }

    pub fn failure(kind: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: Map::new(),
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    /// Convert into the stage output, or the error this response stands for.
    pub fn into_result(self, stage: StageKind) -> Result<Map<String, Value>> {
        if self.ok {
            return Ok(self.output);
        }
        let detail = self
            .message
            .unwrap_or_else(|| "stage reported failure without a message".into());
        match self.error_kind.unwrap_or(ErrorClass::Transient) {
            ErrorClass::Transient => Err(BildwerkError::TransientStage { stage, detail }),
            ErrorClass::Fatal => Err(BildwerkError::FatalStage { stage, detail }),
        }
    }
}

/// Uniform interface every stage implementation provides.
///
/// Implementations report failures through the response rather than
/// panicking; the caller applies timeouts and retries.
pub trait StageExecutor: Send + Sync {
    fn execute(&self, request: &StageRequest) -> impl Future<Output = StageResponse> + Send;
}

impl<E: StageExecutor> StageExecutor for Arc<E> {
    fn execute(&self, request: &StageRequest) -> impl Future<Output = StageResponse> + Send {
        (**self).execute(request)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Resized image reference and its pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeOutput {
    pub resized_ref: String,
    pub width: u32,
    pub height: u32,
}

fn malformed(stage: StageKind, detail: impl Into<String>) -> BildwerkError {
    BildwerkError::MalformedOutput {
        stage,
        detail: detail.into(),
    }
}

fn dimension(output: &Map<String, Value>, field: &str) -> Result<u32> {
    output
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| malformed(StageKind::Resize, format!("missing or invalid `{field}`")))
}

/// Resize must report the dimensions of the image it produced; the crop
/// geometry depends on them.  A missing `resizedRef` means the object was
/// resized in place.
pub fn parse_resize_output(output: &Map<String, Value>, image_key: &str) -> Result<ResizeOutput> {
    let resized_ref = match output.get("resizedRef") {
        None | Some(Value::Null) => image_key.to_string(),
        Some(Value::String(reference)) => reference.clone(),
        Some(other) => {
            return Err(malformed(
                StageKind::Resize,
                format!("`resizedRef` is not a string: {other}"),
            ));
        }
    };
    Ok(ResizeOutput {
        resized_ref,
        width: dimension(output, "width")?,
        height: dimension(output, "height")?,
    })
}

/// Number of moderation labels, from `labelCount` or by counting
/// `moderationLabels`.  Never defaults: an unknown count must not let
/// content through.
pub fn parse_label_count(output: &Map<String, Value>) -> Result<u32> {
    if let Some(count) = output.get("labelCount") {
        return count
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                malformed(
                    StageKind::Moderate,
                    format!("`labelCount` is not a non-negative integer: {count}"),
                )
            });
    }
    match output.get("moderationLabels") {
        Some(Value::Array(labels)) => u32::try_from(labels.len())
            .map_err(|_| malformed(StageKind::Moderate, "too many moderation labels")),
        _ => Err(malformed(
            StageKind::Moderate,
            "neither `labelCount` nor `moderationLabels` present",
        )),
    }
}

/// Detected face boxes.  Missing or malformed detections yield an empty
/// list, which the aggregator turns into the full image.
pub fn parse_face_boxes(output: &Map<String, Value>) -> Vec<BoundingBox> {
    let Some(faces) = output.get("faces") else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<BoundingBox>>(faces.clone()) {
        Ok(boxes) => boxes,
        Err(e) => {
            warn!(error = %e, "unreadable face detections, using full image");
            Vec::new()
        }
    }
}
