//! Progress display using indicatif
//!
//! The index file grows while we read it, so there is no known total and
//! only a spinner with a running count is shown.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};

/// Spinner wrapper for displaying processing status
pub struct ProgressBar {
    bar: IndicatifBar,
}

impl ProgressBar {
    /// Create a spinner counting processed items
    pub fn new_spinner(label: &str) -> Self {
        let bar = IndicatifBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner} {pos} ({per_sec})") {
            bar.set_style(style);
        }
        bar.set_message(label.to_string());

        Self { bar }
    }

    /// A spinner that never draws, for runs without `--progress`
    pub fn hidden() -> Self {
        Self {
            bar: IndicatifBar::hidden(),
        }
    }

    /// Increment progress by 1
    pub fn inc(&self) {
        self.bar.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}
