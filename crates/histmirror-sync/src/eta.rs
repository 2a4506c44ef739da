//! Remaining-time estimate shown in the checkpoint.

use std::time::{Duration, Instant};

use histmirror_store::UNKNOWN_ETA;

/// Extrapolates the remaining time from this run's save rate.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    started: Instant,
    saved_this_run: u64,
}

impl EtaEstimator {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            saved_this_run: 0,
        }
    }

    /// Count items stored since the run started.
    pub fn record(&mut self, saved: u64) {
        self.saved_this_run += saved;
    }

    pub fn saved_this_run(&self) -> u64 {
        self.saved_this_run
    }

    /// Remaining time given the overall saved count and the known total.
    ///
    /// Zero once everything is saved; `None` when the total is unknown,
    /// nothing has been saved yet in this run, or the extrapolation does not
    /// fit a `Duration`.
    pub fn estimate(&self, saved_total: u64, total: Option<u64>) -> Option<Duration> {
        self.estimate_at(self.started.elapsed(), saved_total, total)
    }

    fn estimate_at(&self, elapsed: Duration, saved_total: u64, total: Option<u64>) -> Option<Duration> {
        let remaining = total?.saturating_sub(saved_total);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        if self.saved_this_run == 0 {
            return None;
        }
        let secs = elapsed.as_secs_f64() * remaining as f64 / self.saved_this_run as f64;
        Duration::try_from_secs_f64(secs).ok()
    }

    /// The estimate as checkpoint display text.
    pub fn display(&self, saved_total: u64, total: Option<u64>) -> String {
        match self.estimate(saved_total, total) {
            Some(left) => format_hms(left),
            None => UNKNOWN_ETA.to_string(),
        }
    }
}

/// Format as `H:MM:SS`, rounding down to whole seconds.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
