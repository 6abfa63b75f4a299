// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

use bildwerk_core::error::Result;

/// Return the worker's data directory, creating it if needed.
///
/// `$BILDWERK_DATA_DIR` wins; otherwise the XDG data dir, then
/// `~/.local/share`, each with a `bildwerk` subdirectory.
pub fn data_dir() -> Result<PathBuf> {
    let dir = resolve(|name| std::env::var(name).ok());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Return a subdirectory inside the data dir (e.g. "buckets").
pub fn data_subdir(base: &std::path::Path, name: &str) -> Result<PathBuf> {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn resolve(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(explicit) = env("BILDWERK_DATA_DIR").filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let base = if let Some(xdg) = env("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(xdg)
    } else if let Some(home) = env("HOME") {
        PathBuf::from(home).join(".local").join("share")
    } else {
        // Last resort
        PathBuf::from("/tmp")
    };
    base.join("bildwerk")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn explicit_dir_wins() {
        let env = env_of(&[("BILDWERK_DATA_DIR", "/srv/bw"), ("XDG_DATA_HOME", "/xdg")]);
        assert_eq!(resolve(env), PathBuf::from("/srv/bw"));
    }

    #[test]
    fn xdg_then_home() {
        assert_eq!(
            resolve(env_of(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/u")])),
            PathBuf::from("/xdg/bildwerk")
        );
        assert_eq!(
            resolve(env_of(&[("HOME", "/home/u")])),
            PathBuf::from("/home/u/.local/share/bildwerk")
        );
        assert_eq!(resolve(env_of(&[])), PathBuf::from("/tmp/bildwerk"));
    }

    #[test]
    fn subdir_is_created() {
        let base = tempfile::tempdir().expect("tempdir");
        let dir = data_subdir(base.path(), "buckets").expect("subdir");
        assert!(dir.is_dir());
    }
}
