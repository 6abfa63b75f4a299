// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Bildwerk image pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BildwerkError, Result};

/// Audience bucket an image was uploaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessUnit {
    Adult,
    Kids,
}

impl BusinessUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adult => "adult",
            Self::Kids => "kids",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "adult" => Some(Self::Adult),
            "kids" => Some(Self::Kids),
            _ => None,
        }
    }
}

impl std::fmt::Display for BusinessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable status of an image record.
///
/// The string forms are the values stored in the `status` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageStatus {
    /// Created by the upload coordinator, not yet picked up.
    #[serde(rename = "initialized")]
    Initialized,
    /// The orchestrator has started working on the image.
    #[serde(rename = "init processing")]
    InitProcessing,
    /// Kids content with moderation labels; no further processing.
    #[serde(rename = "rejected")]
    Rejected,
    /// All stages done, image published.
    #[serde(rename = "complete")]
    Complete,
    /// A stage failed unrecoverably; see the failure reason.
    #[serde(rename = "failed")]
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::InitProcessing => "init processing",
            Self::Rejected => "rejected",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initialized" => Some(Self::Initialized),
            "init processing" => Some(Self::InitProcessing),
            "rejected" => Some(Self::Rejected),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further pipeline work happens from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Complete | Self::Failed)
    }

    /// Statuses a record may hold immediately before moving to `self`.
    ///
    /// `Initialized` is only reachable from `Failed`, which is the explicit
    /// retry-from-failure path.  `InitProcessing` may be re-entered so that a
    /// run interrupted by a crash can be resumed.
    pub fn predecessors(&self) -> &'static [ImageStatus] {
        match self {
            Self::Initialized => &[Self::Failed],
            Self::InitProcessing => &[Self::Initialized, Self::InitProcessing],
            Self::Rejected | Self::Complete => &[Self::InitProcessing],
            Self::Failed => &[Self::Initialized, Self::InitProcessing],
        }
    }

    pub fn can_advance_to(&self, next: ImageStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Object key of the uploaded image; immutable.
    pub image_key: String,
    pub owner_id: String,
    pub business_unit: BusinessUnit,
    pub status: ImageStatus,
    /// Present once moderation has run.
    pub moderation_label_count: Option<u32>,
    /// Structured reason for `Failed` records (JSON, see `FailureReason`).
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// A freshly uploaded record at `initialized`.
    pub fn new(
        image_key: impl Into<String>,
        owner_id: impl Into<String>,
        business_unit: BusinessUnit,
    ) -> Self {
        let now = Utc::now();
        Self {
            image_key: image_key.into(),
            owner_id: owner_id.into(),
            business_unit,
            status: ImageStatus::Initialized,
            moderation_label_count: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Normalized rectangle, all fields image-relative in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// The whole image.
    pub const FULL: BoundingBox = BoundingBox {
        left: 0.0,
        top: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Whether every edge lies inside the unit square.
    pub fn is_within_unit_square(&self) -> bool {
        self.left >= 0.0
            && self.top >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.right() <= 1.0
            && self.bottom() <= 1.0
    }
}

/// Pixel rectangle to extract from an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropArea {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropArea {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        self.left as u64 + self.width as u64 <= image_width as u64
            && self.top as u64 + self.height as u64 <= image_height as u64
    }
}

/// One unit of work in the pipeline, run by an external executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Resize,
    Moderate,
    DetectFaces,
    Crop,
    Censor,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        Self::Resize,
        Self::Moderate,
        Self::DetectFaces,
        Self::Crop,
        Self::Censor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::Moderate => "moderate",
            Self::DetectFaces => "detect_faces",
            Self::Crop => "crop",
            Self::Censor => "censor",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Network blip, timeout, busy service; safe to retry automatically.
    Transient,
    /// Corrupt image, rejected write, malformed output; never retried.
    Fatal,
}

/// "New image available" event, delivered at least once per upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub image_key: String,
    pub bucket: String,
}

/// Wire shape before validation; both fields may be absent.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTriggerEvent {
    image_key: Option<String>,
    bucket: Option<String>,
}

impl TriggerEvent {
    pub fn new(image_key: impl Into<String>, bucket: impl Into<String>) -> Result<Self> {
        let event = Self {
            image_key: image_key.into(),
            bucket: bucket.into(),
        };
        event.validate()?;
        Ok(event)
    }

    /// Parse and validate a JSON trigger event.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawTriggerEvent = serde_json::from_str(json)
            .map_err(|e| BildwerkError::Validation(format!("not a trigger event: {e}")))?;
        let image_key = raw
            .image_key
            .ok_or_else(|| BildwerkError::Validation("missing imageKey".into()))?;
        let bucket = raw
            .bucket
            .ok_or_else(|| BildwerkError::Validation("missing bucket".into()))?;
        Self::new(image_key, bucket)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_key.trim().is_empty() {
            return Err(BildwerkError::Validation("empty imageKey".into()));
        }
        if self.bucket.trim().is_empty() {
            return Err(BildwerkError::Validation("empty bucket".into()));
        }
        Ok(())
    }
}
