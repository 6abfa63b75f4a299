// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bildwerk transform: pixel stages run in-process against a filesystem
// bucket.  Moderation and face detection have no local implementation.

pub mod bucket;
pub mod local;
pub mod processor;

pub use bucket::LocalBucket;
pub use local::LocalTransform;
pub use processor::ImageProcessor;
