// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Workflow orchestrator.
//
// Drives one image through the state machine in `workflow`: each stage state
// issues a stage call through the timeout/retry wrapper, each decision state
// evaluates its branch, and the durable status is written as states are
// entered.  Runs for different images share nothing but the in-flight set.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use bildwerk_core::config::PipelineConfig;
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::failure::describe_failure;
use bildwerk_core::types::{ImageRecord, ImageStatus, StageKind, TriggerEvent};
use bildwerk_store::{StatusStore, StatusUpdate};

use crate::geometry::{aggregate_bounding_boxes, resolve_crop_area};
use crate::invoke::{InvokePolicy, invoke_stage};
use crate::retry::RetryConfig;
use crate::stage::{
    ExecutionContext, StageExecutor, StageRequest, parse_face_boxes, parse_label_count,
    parse_resize_output,
};
use crate::workflow::{BranchFacts, Event, WorkflowState, transition};

/// How a trigger was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pipeline ran to this terminal status.
    Finished(ImageStatus),
    /// The record was already terminal; nothing was done.
    AlreadyTerminal(ImageStatus),
    /// Another run for the same key is in progress in this process.
    InFlight,
    /// No record exists for the key; the trigger was dropped.
    Dropped,
}

/// Sequences stage calls for images and keeps their status records current.
pub struct Orchestrator<E, S> {
    executor: Arc<E>,
    store: Arc<S>,
    config: Arc<PipelineConfig>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<E, S> Clone for Orchestrator<E, S> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

/// Removes a key from the in-flight set when the run ends, however it ends.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let mut keys = set.lock().unwrap_or_else(|p| p.into_inner());
        if !keys.insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = self.set.lock().unwrap_or_else(|p| p.into_inner());
        keys.remove(&self.key);
    }
}

/// State carried through one run.
struct Execution<'a> {
    trigger: &'a TriggerEvent,
    record: ImageRecord,
    state: WorkflowState,
    context: ExecutionContext,
}

impl<E: StageExecutor, S: StatusStore> Orchestrator<E, S> {
    pub fn new(executor: Arc<E>, store: Arc<S>, config: Arc<PipelineConfig>) -> Self {
        Self {
            executor,
            store,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle a "new image available" trigger.
    ///
    /// Safe to call more than once for the same image: a terminal record is
    /// returned as-is without invoking any stage.  Fatal stage failures mark
    /// the record `failed` and are returned as the error.
    #[instrument(
        skip_all,
        fields(image_key = %trigger.image_key, execution_id = %Uuid::new_v4())
    )]
    pub async fn run(&self, trigger: &TriggerEvent) -> Result<RunOutcome> {
        trigger.validate()?;

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &trigger.image_key) else {
            info!("run already in progress for this image");
            return Ok(RunOutcome::InFlight);
        };

        let Some(record) = self.store.get(&trigger.image_key)? else {
            warn!("no image record, dropping trigger");
            return Ok(RunOutcome::Dropped);
        };

        if record.status.is_terminal() {
            info!(status = %record.status, "image already processed");
            return Ok(RunOutcome::AlreadyTerminal(record.status));
        }

        let status = self.drive(trigger, record).await?;
        Ok(RunOutcome::Finished(status))
    }

    /// Move a `failed` record back to `initialized` and run the pipeline
    /// again.
    #[instrument(
        skip_all,
        fields(image_key = %trigger.image_key, execution_id = %Uuid::new_v4())
    )]
    pub async fn retry_failed(&self, trigger: &TriggerEvent) -> Result<RunOutcome> {
        trigger.validate()?;

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &trigger.image_key) else {
            return Ok(RunOutcome::InFlight);
        };

        let mut record = self
            .store
            .get(&trigger.image_key)?
            .ok_or_else(|| BildwerkError::RecordNotFound(trigger.image_key.clone()))?;

        if record.status != ImageStatus::Failed {
            return Err(BildwerkError::ConditionFailed {
                image_key: trigger.image_key.clone(),
                detail: format!("only failed images can be retried, status is {}", record.status),
            });
        }

        self.store
            .update(&trigger.image_key, &StatusUpdate::to(ImageStatus::Initialized))?;
        record.status = ImageStatus::Initialized;
        record.failure_reason = None;
        info!("failed image reset for retry");

        let status = self.drive(trigger, record).await?;
        Ok(RunOutcome::Finished(status))
    }

    /// Run the state machine to a terminal state.
    async fn drive(&self, trigger: &TriggerEvent, record: ImageRecord) -> Result<ImageStatus> {
        let mut run = Execution {
            trigger,
            record,
            state: WorkflowState::Init,
            context: ExecutionContext::default(),
        };

        // `run.state` only advances once the entry write for the next state
        // has landed, so a failure is always recorded from a live state.
        let mut event = Event::Start;
        loop {
            let next = match transition(run.state, event, &self.facts(&run), &self.config.policy) {
                Ok(next) => next,
                Err(err) => return self.fail(&run, err),
            };
            debug!(from = %run.state, to = %next, "transition");

            if let Err(err) = self.persist_entry(&run, next) {
                return self.fail(&run, err);
            }
            run.state = next;

            event = match run.state {
                WorkflowState::Complete => {
                    info!("image complete");
                    return Ok(ImageStatus::Complete);
                }
                WorkflowState::Rejected => {
                    info!(labels = ?run.context.label_count, "image rejected for audience");
                    return Ok(ImageStatus::Rejected);
                }
                WorkflowState::Failed => {
                    // Only reachable through `fail`.
                    return Err(BildwerkError::InvalidTransition(
                        "entered failed without an error".into(),
                    ));
                }
                WorkflowState::EvaluatingAudience | WorkflowState::EvaluatingContent => {
                    Event::Evaluate
                }
                state => match self.run_stage(state, &mut run).await {
                    Ok(()) => Event::StageSucceeded,
                    Err(err) => return self.fail(&run, err),
                },
            };
        }
    }

    fn facts(&self, run: &Execution<'_>) -> BranchFacts {
        BranchFacts {
            business_unit: run.record.business_unit,
            label_count: run.context.label_count,
        }
    }

    /// Write the status belonging to `next`, the state about to be entered.
    fn persist_entry(&self, run: &Execution<'_>, next: WorkflowState) -> Result<()> {
        let key = &run.trigger.image_key;
        let update = match next {
            WorkflowState::EvaluatingAudience => {
                StatusUpdate::to(ImageStatus::InitProcessing).with_label_count(run.context.label_count)
            }
            state => match state.entry_status() {
                Some(status) => StatusUpdate::to(status).with_label_count(run.context.label_count),
                None => return Ok(()),
            },
        };
        self.store.update(key, &update)
    }

    /// Record a fatal error on the image and hand it back to the caller.
    fn fail(&self, run: &Execution<'_>, err: BildwerkError) -> Result<ImageStatus> {
        let reason = describe_failure(&err);
        error!(state = %run.state, error = %err, "image failed");

        let next = transition(run.state, Event::StageFailed, &self.facts(run), &self.config.policy);
        if next.is_ok() {
            let update = StatusUpdate::to(ImageStatus::Failed)
                .with_label_count(run.context.label_count)
                .with_failure_reason(reason.to_json());
            if let Err(write_err) = self.store.update(&run.trigger.image_key, &update) {
                error!(error = %write_err, "could not record failure");
            }
        }
        Err(err)
    }

    /// Execute the stage belonging to `state` and fold its output into the
    /// execution context.
    async fn run_stage(&self, state: WorkflowState, run: &mut Execution<'_>) -> Result<()> {
        let Some(stage) = state.stage() else {
            return Err(BildwerkError::InvalidTransition(format!(
                "{state} has no stage to run"
            )));
        };

        if stage == StageKind::Crop {
            self.prepare_crop(run)?;
            if run.context.crop_area.is_some_and(|area| area.is_empty()) {
                warn!("empty crop area, keeping the image uncropped");
                return Ok(());
            }
        }

        let request = StageRequest {
            stage,
            image_key: run.trigger.image_key.clone(),
            bucket: run.trigger.bucket.clone(),
            context: run.context.clone(),
            parameters: self.parameters(stage, &run.context),
        };
        let output = invoke_stage(self.executor.as_ref(), &request, &self.policy()).await?;

        match stage {
            StageKind::Resize => {
                let resized = parse_resize_output(&output, &run.trigger.image_key)?;
                debug!(width = resized.width, height = resized.height, "resized");
                run.context.resized_ref = Some(resized.resized_ref);
                run.context.image_width = Some(resized.width);
                run.context.image_height = Some(resized.height);
            }
            StageKind::Moderate => {
                let count = parse_label_count(&output)?;
                debug!(labels = count, "moderated");
                run.context.label_count = Some(count);
            }
            StageKind::DetectFaces => {
                let faces = parse_face_boxes(&output);
                debug!(faces = faces.len(), "faces detected");
                run.context.face_boxes = Some(faces);
            }
            StageKind::Crop | StageKind::Censor => {}
        }
        Ok(())
    }

    /// Merge the detected faces and turn them into a pixel crop rectangle.
    fn prepare_crop(&self, run: &mut Execution<'_>) -> Result<()> {
        let (Some(width), Some(height)) = (run.context.image_width, run.context.image_height) else {
            return Err(BildwerkError::MalformedOutput {
                stage: StageKind::Resize,
                detail: "image dimensions unknown at crop time".into(),
            });
        };

        let faces = run.context.face_boxes.as_deref().unwrap_or_default();
        let bounding_box = aggregate_bounding_boxes(faces);
        let area = resolve_crop_area(&bounding_box, self.config.crop_padding_px, width, height);
        debug!(?bounding_box, ?area, "crop resolved");

        run.context.bounding_box = Some(bounding_box);
        run.context.crop_area = Some(area);
        Ok(())
    }

    fn parameters(&self, stage: StageKind, context: &ExecutionContext) -> Map<String, Value> {
        let params = match stage {
            StageKind::Resize => json!({
                "maxWidth": self.config.resize.max_width,
                "maxHeight": self.config.resize.max_height,
            }),
            StageKind::Moderate => json!({
                "minConfidence": self.config.moderation.min_confidence,
            }),
            StageKind::Censor => json!({
                "blurSigma": self.config.censor.blur_sigma,
                "labelCount": context.label_count,
            }),
            StageKind::DetectFaces | StageKind::Crop => json!({}),
        };
        match params {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn policy(&self) -> InvokePolicy {
        InvokePolicy {
            timeout: self.config.stage_timeout(),
            retry: RetryConfig::from(&self.config.retry),
        }
    }
}
