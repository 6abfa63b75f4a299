// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry engine with exponential backoff + jitter for stage invocations.
//
// Errors are classified as Transient (auto-retry) or Fatal (give up).  Only
// transient errors are retried, and only up to a small fixed attempt cap.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use bildwerk_core::config::RetrySettings;
use bildwerk_core::error::BildwerkError;
use bildwerk_core::failure::classify_error;
use bildwerk_core::types::ErrorClass;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry, the error is fatal.
    GiveUp,
    /// Maximum retries exhausted.
    Exhausted,
}

/// Decide whether to retry after `attempt` (zero-based) failed with `err`.
///
/// `image_key` seeds the jitter, so different images back off on different
/// schedules while one image's schedule stays reproducible.
pub fn should_retry(
    err: &BildwerkError,
    attempt: u32,
    config: &RetryConfig,
    image_key: &str,
) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Fatal => {
            info!("fatal error, not retrying");
            RetryDecision::GiveUp
        }
        ErrorClass::Transient => {
            if attempt >= config.max_retries {
                warn!(attempt, max = config.max_retries, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempt, config, image_key);
                debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Exponential backoff: min(base * 2^attempt + jitter, max_delay), with the
/// jitter in [0, base).
fn compute_delay(attempt: u32, config: &RetryConfig, image_key: &str) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));

    let jitter_ms = jitter(base_ms, attempt, image_key);
    let total_ms = exp_ms.saturating_add(jitter_ms);
    let capped_ms = total_ms.min(config.max_delay.as_millis() as u64);

    Duration::from_millis(capped_ms)
}

/// Jitter in [0, base) from a hash of the image key and the attempt.
fn jitter(base_ms: u64, attempt: u32, image_key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    image_key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    hasher.finish() % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use bildwerk_core::types::StageKind;

    use super::*;

    fn transient() -> BildwerkError {
        BildwerkError::TransientStage {
            stage: StageKind::Resize,
            detail: "connection reset".into(),
        }
    }

    #[test]
    fn retry_respects_max() {
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        assert!(matches!(
            should_retry(&transient(), 0, &config, "img.jpg"),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            should_retry(&transient(), 2, &config, "img.jpg"),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            should_retry(&transient(), 3, &config, "img.jpg"),
            RetryDecision::Exhausted
        ));
    }

    #[test]
    fn fatal_error_never_retries() {
        let config = RetryConfig::default();
        let err = BildwerkError::FatalStage {
            stage: StageKind::Resize,
            detail: "corrupt image".into(),
        };
        assert!(matches!(should_retry(&err, 0, &config, "img.jpg"), RetryDecision::GiveUp));
    }

    #[test]
    fn delay_increases_with_attempts() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let d0 = compute_delay(0, &config, "img.jpg");
        let d1 = compute_delay(1, &config, "img.jpg");
        let d2 = compute_delay(2, &config, "img.jpg");
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(compute_delay(20, &config, "img.jpg") <= Duration::from_secs(1));
    }

    #[test]
    fn jitter_depends_on_the_image() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(
            compute_delay(1, &config, "a.jpg"),
            compute_delay(1, &config, "a.jpg")
        );

        let delays: std::collections::HashSet<Duration> = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]
            .iter()
            .map(|key| compute_delay(1, &config, key))
            .collect();
        assert!(delays.len() > 1, "every image got the same delay");
        for delay in delays {
            assert!(delay >= Duration::from_secs(2) && delay < Duration::from_secs(3));
        }
    }

    #[test]
    fn settings_convert() {
        let config = RetryConfig::from(&RetrySettings {
            max_retries: 1,
            base_delay_ms: 5,
            max_delay_ms: 50,
        });
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.base_delay, Duration::from_millis(5));
        assert_eq!(config.max_delay, Duration::from_millis(50));
    }
}
