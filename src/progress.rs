use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressStyle};

/// A simple spinner for long-running stages, drawn on stderr.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(message.into());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Share the underlying bar with a stage that reports byte progress.
    pub fn clone_bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// Print a `✔ message` line and start the next stage on the same spinner.
    pub fn step(&self, done: impl Into<String>, next: impl Into<String>) {
        self.bar.suspend(|| eprintln!("{} {}", "✔".green(), done.into()));
        self.bar.set_length(0);
        self.bar.set_style(spinner_style());
        self.bar.set_message(next.into());
    }

    /// Clear the spinner and print a `✔ message` line to stderr.
    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", "✔".green(), message.into());
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.dim} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
