// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Status store contract consumed by the orchestrator.

use std::sync::Arc;

use bildwerk_core::error::Result;
use bildwerk_core::types::{ImageRecord, ImageStatus};

/// One status transition plus the fields written alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ImageStatus,
    /// Written when present; an absent count leaves the stored value alone.
    pub moderation_label_count: Option<u32>,
    /// Replaces the stored reason (so `None` clears it).
    pub failure_reason: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: ImageStatus) -> Self {
        Self {
            status,
            moderation_label_count: None,
            failure_reason: None,
        }
    }

    pub fn with_label_count(mut self, count: Option<u32>) -> Self {
        self.moderation_label_count = count;
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Durable per-image record keyed by `image_key`.
///
/// Implementations must make `update` atomic: the write only lands when the
/// record exists and its current status may advance to `update.status`
/// (see `ImageStatus::predecessors`).  Anything else is
/// `BildwerkError::ConditionFailed`.
///
/// Methods are synchronous; callers must not hold a lock across an await
/// while calling them.
pub trait StatusStore: Send + Sync {
    /// Fetch a record; `Ok(None)` when the key is unknown.
    fn get(&self, image_key: &str) -> Result<Option<ImageRecord>>;

    /// Apply a forward-only status transition.
    fn update(&self, image_key: &str, update: &StatusUpdate) -> Result<()>;
}

impl<S: StatusStore + ?Sized> StatusStore for Arc<S> {
    fn get(&self, image_key: &str) -> Result<Option<ImageRecord>> {
        (**self).get(image_key)
    }

    fn update(&self, image_key: &str, update: &StatusUpdate) -> Result<()> {
        (**self).update(image_key, update)
    }
}
