// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process stage executor for the pixel stages.
//
// Resize rewrites the uploaded object in place; crop and censor then work on
// the object the resize stage reported.  Decoding and encoding run on the
// blocking pool.
//
// A blocking job cannot be cancelled.  When the caller stops waiting (a
// timeout), the job is parked per image and the next call for that image
// waits for it first; a parked job of the same stage that succeeded is
// taken as that call's result instead of transforming the image again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use bildwerk_core::config::{CensorSettings, PipelineConfig, ResizeSettings};
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::failure::classify_error;
use bildwerk_core::types::StageKind;
use bildwerk_pipeline::stage::{StageExecutor, StageRequest, StageResponse};

use crate::bucket::LocalBucket;
use crate::processor::ImageProcessor;

type JobResult = std::result::Result<Result<Map<String, Value>>, JoinError>;

/// A blocking job whose caller may have given up on it.
#[derive(Debug)]
struct Job {
    stage: StageKind,
    handle: JoinHandle<Result<Map<String, Value>>>,
}

type Parked = Arc<Mutex<HashMap<String, Job>>>;

/// Holds a job while it is awaited.  Dropped before the job finishes, it
/// parks the job under its image.
struct JobGuard {
    parked: Parked,
    key: String,
    job: Option<Job>,
}

impl JobGuard {
    async fn wait(mut self) -> JobResult {
        let joined = match self.job.as_mut() {
            Some(job) => (&mut job.handle).await,
            None => return Ok(Err(BildwerkError::Validation("job already awaited".into()))),
        };
        self.job = None;
        joined
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            debug!(key = %self.key, stage = %job.stage, "parking unfinished local job");
            let mut parked = self.parked.lock().unwrap_or_else(|p| p.into_inner());
            parked.insert(self.key.clone(), job);
        }
    }
}

/// Runs resize, crop, and censor against a [`LocalBucket`].
#[derive(Debug, Clone)]
pub struct LocalTransform {
    bucket: LocalBucket,
    resize: ResizeSettings,
    censor: CensorSettings,
    parked: Parked,
}

impl LocalTransform {
    pub fn new(bucket: LocalBucket, config: &PipelineConfig) -> Self {
        Self {
            bucket,
            resize: config.resize.clone(),
            censor: config.censor.clone(),
            parked: Arc::default(),
        }
    }

    fn guard(&self, key: &str, job: Job) -> JobGuard {
        JobGuard {
            parked: Arc::clone(&self.parked),
            key: key.to_string(),
            job: Some(job),
        }
    }

    fn take_parked(&self, key: &str) -> Option<Job> {
        let mut parked = self.parked.lock().unwrap_or_else(|p| p.into_inner());
        parked.remove(key)
    }

    /// Perform the stage synchronously.
    pub fn apply(&self, request: &StageRequest) -> Result<Map<String, Value>> {
        match request.stage {
            StageKind::Resize => self.resize(request),
            StageKind::Crop => self.crop(request),
            StageKind::Censor => self.censor(request),
            stage @ (StageKind::Moderate | StageKind::DetectFaces) => Err(BildwerkError::FatalStage {
                stage,
                detail: "no local implementation for this stage".into(),
            }),
        }
    }

    fn resize(&self, request: &StageRequest) -> Result<Map<String, Value>> {
        let max_width = param_u32(request, "maxWidth").unwrap_or(self.resize.max_width);
        let max_height = param_u32(request, "maxHeight").unwrap_or(self.resize.max_height);

        let path = self.bucket.object_path(&request.bucket, &request.image_key)?;
        let resized = ImageProcessor::open(&path)?.resize_within(max_width, max_height);
        resized.save(&path)?;
        info!(width = resized.width(), height = resized.height(), "resized in place");

        Ok(object(json!({
            "resizedRef": request.image_key,
            "width": resized.width(),
            "height": resized.height(),
        })))
    }

    fn crop(&self, request: &StageRequest) -> Result<Map<String, Value>> {
        let area = request.context.crop_area.ok_or_else(|| {
            BildwerkError::Validation("crop request without a crop area".into())
        })?;
        if area.is_empty() {
            warn!("empty crop area, leaving image as is");
            return Ok(Map::new());
        }

        let path = self.target(request)?;
        let cropped = ImageProcessor::open(&path)?.crop(area);
        cropped.save(&path)?;
        debug!(?area, "cropped");

        Ok(object(json!({
            "width": cropped.width(),
            "height": cropped.height(),
        })))
    }

    fn censor(&self, request: &StageRequest) -> Result<Map<String, Value>> {
        let sigma = request
            .parameters
            .get("blurSigma")
            .and_then(Value::as_f64)
            .map(|s| s as f32)
            .unwrap_or(self.censor.blur_sigma);

        let path = self.target(request)?;
        ImageProcessor::open(&path)?.blur(sigma).save(&path)?;
        info!(sigma, labels = ?request.context.label_count, "censored");
        Ok(Map::new())
    }

    /// The object later stages operate on: the resized copy when known.
    fn target(&self, request: &StageRequest) -> Result<std::path::PathBuf> {
        let key = request
            .context
            .resized_ref
            .as_deref()
            .unwrap_or(&request.image_key);
        self.bucket.object_path(&request.bucket, key)
    }
}

fn param_u32(request: &StageRequest, name: &str) -> Option<u32> {
    request
        .parameters
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl StageExecutor for LocalTransform {
    async fn execute(&self, request: &StageRequest) -> StageResponse {
        let stage = request.stage;
        let key = format!("{}/{}", request.bucket, request.image_key);

        if let Some(earlier) = self.take_parked(&key) {
            let earlier_stage = earlier.stage;
            info!(%stage, %earlier_stage, "waiting for an unfinished local job");
            let joined = self.guard(&key, earlier).wait().await;
            if earlier_stage == stage {
                if let Ok(Ok(output)) = joined {
                    info!(%stage, "unfinished job completed the stage");
                    return StageResponse::success(output);
                }
            }
        }

        let this = self.clone();
        let owned = request.clone();
        let handle = tokio::task::spawn_blocking(move || this.apply(&owned));

        match self.guard(&key, Job { stage, handle }).wait().await {
            Ok(Ok(output)) => StageResponse::success(output),
            Ok(Err(err)) => {
                warn!(%stage, error = %err, "local stage failed");
                StageResponse::failure(classify_error(&err), err.to_string())
            }
            Err(join_err) => StageResponse::transient(format!("{stage} worker aborted: {join_err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgb, RgbImage};

    use bildwerk_core::types::{CropArea, ErrorClass};
    use bildwerk_pipeline::stage::ExecutionContext;

    use super::*;

    fn setup(width: u32, height: u32) -> (tempfile::TempDir, LocalTransform) {
        let dir = tempfile::tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("mkdir");
        let img = RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 80, 160]));
        DynamicImage::ImageRgb8(img)
            .save(uploads.join("cat.png"))
            .expect("seed image");

        let transform = LocalTransform::new(LocalBucket::new(dir.path()), &PipelineConfig::default());
        (dir, transform)
    }

    fn request(stage: StageKind, context: ExecutionContext) -> StageRequest {
        StageRequest {
            stage,
            image_key: "cat.png".into(),
            bucket: "uploads".into(),
            context,
            parameters: Map::new(),
        }
    }

    fn dimensions(dir: &tempfile::TempDir) -> (u32, u32) {
        let img = ImageProcessor::open(dir.path().join("uploads/cat.png")).expect("open");
        (img.width(), img.height())
    }

    #[tokio::test]
    async fn resize_reports_new_dimensions() {
        let (dir, transform) = setup(400, 100);
        let mut req = request(StageKind::Resize, ExecutionContext::default());
        req.parameters.insert("maxWidth".into(), json!(200));
        req.parameters.insert("maxHeight".into(), json!(200));

        let response = transform.execute(&req).await;

        assert!(response.ok, "{response:?}");
        assert_eq!(response.output["resizedRef"], "cat.png");
        assert_eq!(response.output["width"], 200);
        assert_eq!(response.output["height"], 50);
        assert_eq!(dimensions(&dir), (200, 50));
    }

    #[tokio::test]
    async fn crop_applies_area() {
        let (dir, transform) = setup(100, 80);
        let context = ExecutionContext {
            resized_ref: Some("cat.png".into()),
            crop_area: Some(CropArea {
                left: 10,
                top: 10,
                width: 50,
                height: 40,
            }),
            ..Default::default()
        };

        let response = transform.execute(&request(StageKind::Crop, context)).await;

        assert!(response.ok, "{response:?}");
        assert_eq!(dimensions(&dir), (50, 40));
    }

    #[tokio::test]
    async fn empty_crop_leaves_image_alone() {
        let (dir, transform) = setup(100, 80);
        let context = ExecutionContext {
            crop_area: Some(CropArea {
                left: 100,
                top: 80,
                width: 0,
                height: 0,
            }),
            ..Default::default()
        };

        let response = transform.execute(&request(StageKind::Crop, context)).await;

        assert!(response.ok);
        assert_eq!(dimensions(&dir), (100, 80));
    }

    #[tokio::test]
    async fn censor_keeps_dimensions() {
        let (dir, transform) = setup(64, 64);
        let response = transform
            .execute(&request(StageKind::Censor, ExecutionContext::default()))
            .await;
        assert!(response.ok, "{response:?}");
        assert_eq!(dimensions(&dir), (64, 64));
    }

    #[tokio::test]
    async fn missing_object_is_fatal() {
        let (_dir, transform) = setup(8, 8);
        let mut req = request(StageKind::Resize, ExecutionContext::default());
        req.image_key = "dog.png".into();

        let response = transform.execute(&req).await;

        assert!(!response.ok);
        assert_eq!(response.error_kind, Some(ErrorClass::Fatal));
    }

    #[tokio::test]
    async fn corrupt_object_is_fatal() {
        let (dir, transform) = setup(8, 8);
        std::fs::write(dir.path().join("uploads/cat.png"), b"not a png").expect("corrupt");

        let response = transform
            .execute(&request(StageKind::Resize, ExecutionContext::default()))
            .await;

        assert_eq!(response.error_kind, Some(ErrorClass::Fatal));
    }

    #[tokio::test]
    async fn timed_out_crop_is_applied_once() {
        use std::time::Duration;

        use bildwerk_core::error::BildwerkError;
        use bildwerk_pipeline::invoke::{InvokePolicy, invoke_stage};
        use bildwerk_pipeline::retry::RetryConfig;

        let (dir, transform) = setup(2000, 2000);
        let context = ExecutionContext {
            resized_ref: Some("cat.png".into()),
            crop_area: Some(CropArea {
                left: 500,
                top: 500,
                width: 1000,
                height: 1000,
            }),
            ..Default::default()
        };
        let policy = InvokePolicy {
            timeout: Duration::from_millis(1),
            retry: RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1500),
                max_delay: Duration::from_millis(1500),
            },
        };

        let result = invoke_stage(&transform, &request(StageKind::Crop, context), &policy).await;

        // Either the first attempt beat the timeout or a retry picked up its
        // result; the crop itself ran once.
        match result {
            Ok(_) | Err(BildwerkError::RetriesExhausted { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        while transform.parked.lock().unwrap().values().any(|job| !job.handle.is_finished()) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(dimensions(&dir), (1000, 1000));
    }

    #[tokio::test]
    async fn parked_job_result_is_reused() {
        let (dir, transform) = setup(100, 80);
        let context = ExecutionContext {
            resized_ref: Some("cat.png".into()),
            crop_area: Some(CropArea {
                left: 10,
                top: 10,
                width: 50,
                height: 40,
            }),
            ..Default::default()
        };
        let req = request(StageKind::Crop, context);

        // A crop whose caller stopped waiting before it ran.
        let this = transform.clone();
        let owned = req.clone();
        let handle = tokio::task::spawn_blocking(move || this.apply(&owned));
        drop(transform.guard(
            "uploads/cat.png",
            Job {
                stage: StageKind::Crop,
                handle,
            },
        ));

        let response = transform.execute(&req).await;

        assert!(response.ok, "{response:?}");
        assert_eq!(response.output["width"], 50);
        assert_eq!(dimensions(&dir), (50, 40));
        assert!(transform.parked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn moderation_is_not_local() {
        let (_dir, transform) = setup(8, 8);
        let response = transform
            .execute(&request(StageKind::Moderate, ExecutionContext::default()))
            .await;
        assert_eq!(response.error_kind, Some(ErrorClass::Fatal));
    }
}
