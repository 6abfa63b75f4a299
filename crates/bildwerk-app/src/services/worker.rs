// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Worker service: builds the orchestrator from the data directory and runs
// one task per trigger event read from a line stream.
//
// Distinct images run fully in parallel; the orchestrator itself refuses a
// second concurrent run for the same image key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use bildwerk_core::PipelineConfig;
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::TriggerEvent;
use bildwerk_pipeline::{Orchestrator, RunOutcome};
use bildwerk_store::SqliteStatusStore;
use bildwerk_transform::LocalBucket;

use super::data_dir;
use super::router::StageRouter;

const CONFIG_FILE: &str = "bildwerk.json";
const STATUS_DB: &str = "status.db";
const BUCKETS_DIR: &str = "buckets";

pub type WorkerOrchestrator = Orchestrator<StageRouter, SqliteStatusStore>;

/// Totals for one stream of trigger events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub finished: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub failed: usize,
}

/// Everything the worker loop needs.
#[derive(Clone)]
pub struct Worker {
    orchestrator: WorkerOrchestrator,
    data_dir: PathBuf,
}

impl Worker {
    /// Initialise from the default data directory.
    pub fn init() -> Result<Self> {
        Self::init_in(&data_dir::data_dir()?)
    }

    /// Initialise from an explicit data directory.
    ///
    /// Loads `bildwerk.json` (defaults when absent), opens `status.db`, and
    /// routes local stages to the `buckets` subdirectory.
    pub fn init_in(dir: &Path) -> Result<Self> {
        info!(path = %dir.display(), "initialising worker");

        let config = load_config(dir)?;
        let store = SqliteStatusStore::open(dir.join(STATUS_DB))?;
        let bucket = LocalBucket::new(data_dir::data_subdir(dir, BUCKETS_DIR)?);
        let router = StageRouter::from_config(&config, bucket)?;

        let orchestrator = Orchestrator::new(Arc::new(router), Arc::new(store), Arc::new(config));
        info!("worker initialised");

        Ok(Self {
            orchestrator,
            data_dir: dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Read newline-delimited trigger events until end of input, running one
    /// task per event, and wait for all of them.
    pub async fn process_stream<R>(&self, input: R) -> Result<StreamSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = StreamSummary::default();
        let mut tasks = JoinSet::new();
        let mut lines = input.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let trigger = match TriggerEvent::from_json(&line) {
                Ok(trigger) => trigger,
                Err(e) => {
                    warn!(error = %e, "skipping malformed trigger");
                    summary.malformed += 1;
                    continue;
                }
            };

            let orchestrator = self.orchestrator.clone();
            tasks.spawn(async move {
                let result = orchestrator.run(&trigger).await;
                (trigger, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((trigger, result)) => record_outcome(&mut summary, &trigger, result),
                Err(e) => {
                    error!(error = %e, "pipeline task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(?summary, "trigger stream drained");
        Ok(summary)
    }
}

fn record_outcome(summary: &mut StreamSummary, trigger: &TriggerEvent, result: Result<RunOutcome>) {
    let key = trigger.image_key.as_str();
    match result {
        Ok(RunOutcome::Finished(status)) => {
            info!(image_key = key, %status, "pipeline finished");
            summary.finished += 1;
        }
        Ok(outcome) => {
            info!(image_key = key, ?outcome, "trigger skipped");
            summary.skipped += 1;
        }
        Err(e) => {
            error!(image_key = key, error = %e, "pipeline failed");
            summary.failed += 1;
        }
    }
}

/// Load the pipeline configuration, or defaults when no file exists.
fn load_config(dir: &Path) -> Result<PipelineConfig> {
    let path = dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(data) => PipelineConfig::from_json(&data).map_err(|e| {
            BildwerkError::Config(format!("{}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no config file, using defaults");
            Ok(PipelineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}
