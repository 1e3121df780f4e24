//! Monotonic progress reporting for a sync run.

use log::debug;

/// Tracks run progress as a value moving from 0 toward 100.
///
/// Reports are clamped to the 0–100 range and never move backwards; a
/// regression is dropped rather than forwarded to the sink. The default sink
/// logs at debug level, tests install a recording sink instead.
pub struct ProgressTracker {
    current: f64,
    sink: Box<dyn FnMut(f64) + Send>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_sink(Box::new(|value| debug!("sync progress: {value:.1}%")))
    }

    pub fn with_sink(sink: Box<dyn FnMut(f64) + Send>) -> Self {
        Self { current: 0.0, sink }
    }

    pub fn report(&mut self, value: f64) {
        let value = value.clamp(0.0, 100.0);
        if value < self.current {
            return;
        }
        self.current = value;
        (self.sink)(value);
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
