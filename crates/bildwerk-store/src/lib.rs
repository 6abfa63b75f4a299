// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk store: the durable per-image status record.  The orchestrator
// depends only on the `StatusStore` trait; `SqliteStatusStore` is the
// shipped adapter.

pub mod sqlite;
pub mod status;

pub use sqlite::SqliteStatusStore;
pub use status::{StatusStore, StatusUpdate};
