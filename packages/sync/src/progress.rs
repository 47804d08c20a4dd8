//! Progress reporting trait for long-running sync passes.
//!
//! Defines a [`ProgressCallback`] trait that decouples progress reporting
//! from any specific rendering backend (e.g., `indicatif` progress bars,
//! log-only reporting, or silence). Implementations are provided upstream
//! in crates that choose a rendering strategy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for reporting progress from long-running operations.
///
/// Implementations must be `Send + Sync` to support sharing one sink across
/// concurrently running targets.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete and remove the progress indicator.
    fn finish_and_clear(&self);
}

/// A no-op implementation of [`ProgressCallback`] that silently ignores
/// all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Whole-percent completion of `done` out of `total`; `0` when there is
/// nothing to do.
#[must_use]
pub const fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        0
    } else {
        done.saturating_mul(100) / total
    }
}

/// Translates `(done, total)` counts into percentage updates on a
/// [`ProgressCallback`] whose total is 100.
///
/// Only emits when the whole percentage changes, so a pass over thousands of
/// files produces at most 101 updates.
pub struct PercentProgress<'a> {
    sink: &'a dyn ProgressCallback,
    label: &'static str,
    last: AtomicU64,
}

impl<'a> PercentProgress<'a> {
    /// Starts percentage reporting at 0% under `label`.
    #[must_use]
    pub fn start(sink: &'a dyn ProgressCallback, label: &'static str) -> Self {
        sink.set_total(100);
        sink.set_position(0);
        sink.set_message(format!("{label}: 0%"));
        Self {
            sink,
            label,
            last: AtomicU64::new(0),
        }
    }

    /// Reports `done` of `total` units complete.
    pub fn update(&self, done: u64, total: u64) {
        let pct = percent(done, total).min(100);
        if self.last.swap(pct, Ordering::Relaxed) != pct {
            self.sink.set_position(pct);
            self.sink.set_message(format!("{}: {pct}%", self.label));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingProgress;

    #[test]
    fn percent_of_empty_work_is_zero() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn only_emits_on_change() {
        let recorder = RecordingProgress::default();
        let progress = PercentProgress::start(&recorder, "Uploading");
        for done in 1..=1000 {
            progress.update(done, 1000);
        }
        let positions = recorder.positions();
        assert_eq!(positions.first(), Some(&0));
        assert_eq!(positions.last(), Some(&100));
        assert_eq!(positions.len(), 101);
        assert_eq!(recorder.total(), Some(100));
    }
}
