// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem stand-in for an object bucket.

use std::path::{Component, Path, PathBuf};

use bildwerk_core::error::{BildwerkError, Result};

/// Objects live at `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object to its path.  Bucket and key must be relative paths
    /// made only of normal components, so nothing resolves outside the root.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        check_relative("bucket", bucket)?;
        check_relative("key", key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

fn check_relative(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BildwerkError::Validation(format!("empty object {what}")));
    }
    let path = Path::new(value);
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(BildwerkError::Validation(format!(
            "object {what} {value:?} escapes the bucket"
        )));
    }
    Ok(())
}
