//! Progress reporting for builds.
//!
//! Implement [`ProgressCallback`] to follow a build as it runs; use
//! [`NoProgress`] to ignore it or [`LogProgress`] to send it to the `log`
//! facade.

use crate::engine::Operation;

/// How an operation changed the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The tree changed
    Applied,
    /// Nothing to do: a no-op merge or a merge already in the tree's history
    Unchanged,
}

/// Progress callback for build operations.
pub trait ProgressCallback: Send {
    /// Called once revisions are resolved and the plan is known
    fn on_build_start(&mut self, total: usize);

    /// Called before an operation starts
    fn on_operation_start(&mut self, index: usize, operation: &Operation);

    /// Called after an operation completes
    fn on_operation_complete(&mut self, index: usize, operation: &Operation, outcome: StepOutcome);

    /// Called after the last operation
    fn on_build_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_build_start(&mut self, _total: usize) {}
    fn on_operation_start(&mut self, _index: usize, _operation: &Operation) {}
    fn on_operation_complete(
        &mut self,
        _index: usize,
        _operation: &Operation,
        _outcome: StepOutcome,
    ) {
    }
    fn on_build_complete(&mut self) {}
}

/// Progress callback that logs each operation
#[derive(Default)]
pub struct LogProgress {
    total: usize,
}

impl ProgressCallback for LogProgress {
    fn on_build_start(&mut self, total: usize) {
        self.total = total;
        log::info!("Building {total} operation(s)");
    }

    fn on_operation_start(&mut self, index: usize, operation: &Operation) {
        log::info!("[{}/{}] {operation}", index + 1, self.total);
    }

    fn on_operation_complete(&mut self, index: usize, operation: &Operation, outcome: StepOutcome) {
        if outcome == StepOutcome::Unchanged {
            log::info!("[{}/{}] {operation}: nothing to do", index + 1, self.total);
        }
    }

    fn on_build_complete(&mut self) {
        log::info!("Build complete");
    }
}
