// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk pipeline: the workflow orchestrator, the stage executor contract
// with its timeout/retry wrapper, and the smart-crop geometry.

pub mod command;
pub mod geometry;
pub mod invoke;
pub mod orchestrator;
pub mod retry;
pub mod stage;
pub mod workflow;

pub use command::CommandExecutor;
pub use geometry::{aggregate_bounding_boxes, resolve_crop_area};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use stage::{ExecutionContext, StageExecutor, StageRequest, StageResponse};
pub use workflow::WorkflowState;
