//! Progress reporting and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Receives stage and per-item progress from a run.
///
/// Implementations may also request cancellation; the pipeline polls
/// [`cancel_requested`](ProgressSink::cancel_requested) before each unit of
/// work and at every join point, and latches the answer into the run's
/// [`CancelFlag`].
pub trait ProgressSink: Send + Sync {
    fn begin_stage(&self, name: &str, steps: usize);
    fn advance(&self, label: &str);

    fn cancel_requested(&self) -> bool {
        false
    }
}

/// Sink that ignores everything
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn begin_stage(&self, _name: &str, _steps: usize) {}
    fn advance(&self, _label: &str) {}
}

/// Sink that reports through the `log` crate
#[derive(Default)]
pub struct LogProgress {
    state: Mutex<StageState>,
}

#[derive(Default)]
struct StageState {
    name: String,
    steps: usize,
    done: usize,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn begin_stage(&self, name: &str, steps: usize) {
        let mut state = self.state.lock();
        state.name = name.to_string();
        state.steps = steps;
        state.done = 0;
        log::info!("{}: {} item(s)", name, steps);
    }

    fn advance(&self, label: &str) {
        let mut state = self.state.lock();
        state.done += 1;
        log::debug!("{}: {}/{} ({})", state.name, state.done, state.steps, label);
    }
}

/// Shared, latching cancellation flag.
///
/// Once set it stays set for the lifetime of the run. Cancellation is
/// cooperative: in-flight payload fetches are drained to completion, and
/// nothing already finalized is rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_latches_across_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.request();
        assert!(other.is_cancelled());
    }
}
