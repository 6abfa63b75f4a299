// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.  Passed explicitly to whichever component needs
// it; nothing here is read from process-wide state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BildwerkError, Result};
use crate::types::StageKind;

/// Settings for one orchestrator instance and the stages it drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetrySettings,
    /// Per-call timeout applied to every stage invocation.
    pub stage_timeout_ms: u64,
    /// Pixels added on every side of the aggregated face box before cropping.
    pub crop_padding_px: u32,
    pub policy: ContentPolicy,
    pub resize: ResizeSettings,
    pub censor: CensorSettings,
    pub moderation: ModerationSettings,
    pub stages: StageBackends,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            stage_timeout_ms: 3_000,
            crop_padding_px: 0,
            policy: ContentPolicy::default(),
            resize: ResizeSettings::default(),
            censor: CensorSettings::default(),
            moderation: ModerationSettings::default(),
            stages: StageBackends::default(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Parse a JSON configuration document; absent keys take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stage_timeout_ms == 0 {
            return Err(BildwerkError::Config("stage_timeout_ms must be > 0".into()));
        }
        if self.resize.max_width == 0 || self.resize.max_height == 0 {
            return Err(BildwerkError::Config("resize bounds must be > 0".into()));
        }
        if !(self.censor.blur_sigma > 0.0) {
            return Err(BildwerkError::Config("censor.blur_sigma must be > 0".into()));
        }
        for stage in [StageKind::Moderate, StageKind::DetectFaces] {
            if matches!(self.stages.backend(stage), StageBackend::Local) {
                return Err(BildwerkError::Config(format!(
                    "{stage} has no local implementation; configure a command"
                )));
            }
        }
        Ok(())
    }
}

/// Bounded exponential backoff for transient stage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Moderation thresholds.
///
/// Both currently read `labelCount > 0`, but they gate different
/// consequences and are tuned independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPolicy {
    /// Kids content is rejected when the label count exceeds this.
    pub audience_rejection_threshold: u32,
    /// Any content is blurred when the label count exceeds this.
    pub censorship_threshold: u32,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            audience_rejection_threshold: 0,
            censorship_threshold: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeSettings {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            max_width: 1800,
            max_height: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CensorSettings {
    pub blur_sigma: f32,
}

impl Default for CensorSettings {
    fn default() -> Self {
        Self { blur_sigma: 4.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
    /// Minimum label confidence (percent) forwarded to the moderation service.
    pub min_confidence: u8,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self { min_confidence: 50 }
    }
}

/// Where a stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageBackend {
    /// External program speaking the stage contract over stdin/stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// In-process pixel transform (resize, crop, censor only).
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageBackends {
    pub resize: StageBackend,
    pub moderate: StageBackend,
    pub detect_faces: StageBackend,
    pub crop: StageBackend,
    pub censor: StageBackend,
}

impl Default for StageBackends {
    fn default() -> Self {
        Self {
            resize: StageBackend::Local,
            moderate: StageBackend::Command {
                program: "bildwerk-moderate".into(),
                args: Vec::new(),
            },
            detect_faces: StageBackend::Command {
                program: "bildwerk-detect-faces".into(),
                args: Vec::new(),
            },
            crop: StageBackend::Local,
            censor: StageBackend::Local,
        }
    }
}

impl StageBackends {
    pub fn backend(&self, stage: StageKind) -> &StageBackend {
        match stage {
            StageKind::Resize => &self.resize,
            StageKind::Moderate => &self.moderate,
            StageKind::DetectFaces => &self.detect_faces,
            StageKind::Crop => &self.crop,
            StageKind::Censor => &self.censor,
        }
    }
}
