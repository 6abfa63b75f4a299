// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk core: domain types and errors shared across all crates, plus the
// pipeline configuration value.

pub mod config;
pub mod error;
pub mod failure;
pub mod types;

pub use config::PipelineConfig;
pub use error::BildwerkError;
pub use types::*;
