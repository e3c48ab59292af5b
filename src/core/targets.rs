/*!
 * Source-to-destination mapping for copy runs
 *
 * Resolved once by the coordinator before any work is enqueued:
 * - one file onto a file or a new path
 * - one directory onto a new path, or into an existing directory
 * - several sources only into an existing directory
 *
 * Combinations that can never work are fatal validation errors. Problems
 * with one source (missing, directory without recursion, a destination an
 * earlier source already claimed) only reject that source.
 */

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::CopyPolicy;
use crate::error::{CollateError, Result};

/// One top-level source and where it lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPair {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Resolved mapping for a run
#[derive(Debug, Default)]
pub struct TargetSpec {
    pub pairs: Vec<CopyPair>,
    /// Sources dropped with the reason, reported as per-object failures
    pub rejected: Vec<CollateError>,
}

/// Map `sources` onto `target` under `policy`
pub fn resolve_targets(sources: &[PathBuf], target: &Path, policy: &CopyPolicy) -> Result<TargetSpec> {
    if sources.is_empty() {
        return Err(CollateError::Validation("missing source operand".to_string()));
    }

    let target_is_dir = match fs::metadata(target) {
        Ok(meta) => Some(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if sources.len() > 1 && target_is_dir != Some(true) {
        return Err(CollateError::Validation(format!(
            "target '{}' is not a directory",
            target.display()
        )));
    }

    if target_is_dir.is_none() {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(CollateError::Validation(format!(
                "cannot create '{}': parent directory does not exist",
                target.display()
            )));
        }
    }

    let mut spec = TargetSpec::default();
    let mut claimed = HashSet::new();
    for source in sources {
        let meta = if policy.dereference {
            fs::metadata(source)
        } else {
            fs::symlink_metadata(source)
        };
        let meta = match meta {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                spec.rejected.push(CollateError::SourceNotFound(source.clone()));
                continue;
            }
            Err(e) => {
                spec.rejected.push(e.into());
                continue;
            }
        };

        if meta.is_dir() && !policy.recursive {
            spec.rejected.push(CollateError::InvalidPath(source.clone()));
            continue;
        }

        let dest = if target_is_dir == Some(true) {
            match source.file_name() {
                Some(name) => target.join(name),
                None => {
                    spec.rejected.push(CollateError::InvalidPath(source.clone()));
                    continue;
                }
            }
        } else {
            if meta.is_dir() && target_is_dir == Some(false) {
                return Err(CollateError::Validation(format!(
                    "cannot overwrite non-directory '{}' with directory '{}'",
                    target.display(),
                    source.display()
                )));
            }
            target.to_path_buf()
        };

        if meta.is_dir() && is_inside(&dest, source) {
            spec.rejected.push(CollateError::Validation(format!(
                "cannot copy directory '{}' into itself",
                source.display()
            )));
            continue;
        }

        // Two sources writing one destination would interleave their segments
        if !claimed.insert(dest.clone()) {
            spec.rejected.push(CollateError::Validation(format!(
                "will not overwrite just-created '{}' with '{}'",
                dest.display(),
                source.display()
            )));
            continue;
        }

        spec.pairs.push(CopyPair {
            source: source.clone(),
            dest,
        });
    }

    Ok(spec)
}

/// Whether `dest` would sit at or below `source` once created
fn is_inside(dest: &Path, source: &Path) -> bool {
    let Ok(source) = source.canonicalize() else {
        return false;
    };
    // dest itself may not exist yet; its parent does
    let resolved = match dest.canonicalize() {
        Ok(path) => path,
        Err(_) => match (dest.parent(), dest.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
                match parent.canonicalize() {
                    Ok(parent) => parent.join(name),
                    Err(_) => return false,
                }
            }
            _ => return false,
        },
    };
    resolved.starts_with(&source)
}
