//! Build executor - applies a plan to a working directory.
//!
//! Operations run strictly in plan order. The first failure stops the
//! build and whatever was built so far stays on disk; nothing is rolled
//! back.

use crate::engine::{BuildManifest, BuildPlan, ManifestEntry, Operation};
use crate::error::{BuildError, Result};
use crate::progress::{ProgressCallback, StepOutcome};
use std::path::{Path, PathBuf};
use vcs::{Backend, CancelToken, MergeOutcome};

/// Execute `plan` into the build root `root`.
///
/// # Arguments
/// * `plan` - Operations to run
/// * `root` - Build root; must not exist yet or be empty
/// * `backend` - Version control backend
/// * `cancel` - Checked before every operation
/// * `version` - Expanded version recorded in the manifest
/// * `progress` - Progress callback
///
/// # Returns
/// One manifest entry per operation, in execution order.
pub fn execute<B, P>(
    plan: &BuildPlan,
    root: &Path,
    backend: &B,
    cancel: &CancelToken,
    version: Option<String>,
    progress: &mut P,
) -> Result<BuildManifest>
where
    B: Backend + ?Sized,
    P: ProgressCallback,
{
    let mut manifest = BuildManifest::new(version);
    progress.on_build_start(plan.len());

    for (index, operation) in plan.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("Build cancelled before operation {index}");
            return Err(BuildError::PartialBuild {
                last_completed: index.checked_sub(1),
            });
        }

        progress.on_operation_start(index, operation);
        let outcome = apply(operation, root, backend, cancel)
            .map_err(|e| operation_error(index, operation, e))?;
        manifest
            .entries
            .push(ManifestEntry::from_operation(operation, outcome == StepOutcome::Unchanged));
        progress.on_operation_complete(index, operation, outcome);
    }

    progress.on_build_complete();
    Ok(manifest)
}

fn apply<B: Backend + ?Sized>(
    operation: &Operation,
    root: &Path,
    backend: &B,
    cancel: &CancelToken,
) -> vcs::Result<StepOutcome> {
    let tree = tree_path(root, operation.target());
    match operation {
        Operation::Checkout {
            branch, revision, ..
        }
        | Operation::Nest {
            branch, revision, ..
        } => {
            backend.checkout(branch, revision, &tree, cancel)?;
            Ok(StepOutcome::Applied)
        }
        Operation::Merge { noop: true, .. } => Ok(StepOutcome::Unchanged),
        Operation::Merge {
            nickname,
            branch,
            revision,
            ..
        } => {
            let message = format!("Merge {nickname}");
            match backend.merge(&tree, branch, revision, &message, cancel)? {
                MergeOutcome::Merged => Ok(StepOutcome::Applied),
                MergeOutcome::UpToDate => Ok(StepOutcome::Unchanged),
            }
        }
    }
}

fn tree_path(root: &Path, target: &Path) -> PathBuf {
    if target.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(target)
    }
}

fn operation_error(index: usize, operation: &Operation, error: vcs::Error) -> BuildError {
    let branch = operation.branch().to_string();
    match error {
        vcs::Error::Conflict { paths, .. } => {
            log::error!("Merging {branch} conflicted in {} path(s)", paths.len());
            BuildError::Conflict {
                index,
                branch,
                paths,
            }
        }
        vcs::Error::Cancelled => BuildError::PartialBuild {
            last_completed: index.checked_sub(1),
        },
        source => BuildError::Operation {
            index,
            branch,
            source,
        },
    }
}
