use std::io::Write;

use indicatif::{ProgressBar, ProgressStyle};

use runwarden_core::progress::ProgressState;
use runwarden_core::ExecutionResult;

/// Progress bar for a single script run. Output is printed above the bar.
#[derive(Clone)]
pub struct ScriptProgress {
    bar: ProgressBar,
    enabled: bool,
}

impl ScriptProgress {
    /// `enabled` is false for `--no-progress` or when stderr is not a terminal.
    pub fn new(label: &str, enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
                enabled: false,
            };
        }

        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {prefix} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        bar.set_prefix(label.to_string());
        bar.set_message("Starting...");
        Self { bar, enabled: true }
    }

    pub fn observe(&self, state: &ProgressState) {
        if !self.enabled {
            return;
        }
        self.bar.set_position(state.overall_progress.round() as u64);
        let msg = match (&state.current_phase, &state.message) {
            (Some(phase), Some(m)) => format!("{phase}: {m}"),
            (Some(phase), None) => phase.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => String::new(),
        };
        self.bar.set_message(msg);
    }

    pub fn stdout(&self, text: &str) {
        self.bar.suspend(|| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        });
    }

    pub fn stderr(&self, text: &str) {
        self.bar.suspend(|| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(text.as_bytes());
            let _ = err.flush();
        });
    }

    pub fn finish(&self, result: &ExecutionResult) {
        if !self.enabled {
            return;
        }
        let msg = if result.success {
            format!("✅ done ({}ms)", result.duration_ms)
        } else {
            format!(
                "❌ {}",
                result.error.as_deref().unwrap_or("failed")
            )
        };
        self.bar.abandon_with_message(msg);
    }
}
