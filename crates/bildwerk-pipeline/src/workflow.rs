// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline state machine.
//
// The states and the transition function are pure: no I/O, no clocks.  The
// orchestrator drives them, issuing stage calls and persisting statuses as
// states are entered.

use bildwerk_core::config::ContentPolicy;
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::{BusinessUnit, ImageStatus, StageKind};

/// Where one workflow execution currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Init,
    Resizing,
    Moderating,
    EvaluatingAudience,
    DetectingFaces,
    Cropping,
    EvaluatingContent,
    Censoring,
    Complete,
    Rejected,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Failed)
    }

    /// The stage executed while in this state, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Resizing => Some(StageKind::Resize),
            Self::Moderating => Some(StageKind::Moderate),
            Self::DetectingFaces => Some(StageKind::DetectFaces),
            Self::Cropping => Some(StageKind::Crop),
            Self::Censoring => Some(StageKind::Censor),
            _ => None,
        }
    }

    /// Durable status written when this state is entered.
    pub fn entry_status(&self) -> Option<ImageStatus> {
        match self {
            Self::Resizing => Some(ImageStatus::InitProcessing),
            Self::Complete => Some(ImageStatus::Complete),
            Self::Rejected => Some(ImageStatus::Rejected),
            Self::Failed => Some(ImageStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// What just happened in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    StageSucceeded,
    StageFailed,
    /// Evaluate the branch condition of a decision state.
    Evaluate,
}

/// Inputs the decision states branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchFacts {
    pub business_unit: BusinessUnit,
    /// Known once moderation has succeeded.
    pub label_count: Option<u32>,
}

/// Kids content with moderation labels is rejected outright.
pub fn rejects_for_audience(policy: &ContentPolicy, unit: BusinessUnit, label_count: u32) -> bool {
    unit == BusinessUnit::Kids && label_count > policy.audience_rejection_threshold
}

/// Labelled content is blurred after cropping.
pub fn requires_censorship(policy: &ContentPolicy, label_count: u32) -> bool {
    label_count > policy.censorship_threshold
}

/// Compute the next state.
///
/// Any pair not in the transition table is an `InvalidTransition`, as is
/// evaluating a decision state before moderation has produced a label count.
pub fn transition(
    state: WorkflowState,
    event: Event,
    facts: &BranchFacts,
    policy: &ContentPolicy,
) -> Result<WorkflowState> {
    use WorkflowState::*;

    let next = match (state, event) {
        (Init, Event::Start) => Resizing,

        (Resizing, Event::StageSucceeded) => Moderating,
        (Moderating, Event::StageSucceeded) => EvaluatingAudience,
        (DetectingFaces, Event::StageSucceeded) => Cropping,
        (Cropping, Event::StageSucceeded) => EvaluatingContent,
        (Censoring, Event::StageSucceeded) => Complete,

        (EvaluatingAudience, Event::Evaluate) => {
            if rejects_for_audience(policy, facts.business_unit, labels(state, facts)?) {
                Rejected
            } else {
                DetectingFaces
            }
        }
        (EvaluatingContent, Event::Evaluate) => {
            if requires_censorship(policy, labels(state, facts)?) {
                Censoring
            } else {
                Complete
            }
        }

        (current, Event::StageFailed) if !current.is_terminal() => Failed,

        (current, event) => {
            return Err(BildwerkError::InvalidTransition(format!(
                "{event:?} in state {current}"
            )));
        }
    };
    Ok(next)
}

fn labels(state: WorkflowState, facts: &BranchFacts) -> Result<u32> {
    facts.label_count.ok_or_else(|| {
        BildwerkError::InvalidTransition(format!("{state} evaluated before moderation ran"))
    })
}
