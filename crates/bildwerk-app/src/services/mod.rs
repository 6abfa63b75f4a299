// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: wires configuration, the status database, and the stage
// backends into one orchestrator for the worker loop.

pub mod data_dir;
pub mod router;
pub mod worker;
