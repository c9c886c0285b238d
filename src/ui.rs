//! Terminal feedback for the command-line tools. Everything goes to stderr so
//! stdout stays machine-readable.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
    Quiet,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            Some("quiet") => UiMode::Quiet,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && matches!(self.mode, UiMode::Auto | UiMode::Pretty)
    }

    /// Spinner (or a plain `==>` line) until the guard is dropped.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.mode == UiMode::Quiet {
            return StageGuard::new(name.to_string(), Feedback::Silent);
        }
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Feedback::Bar(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), Feedback::Plain)
        }
    }

    /// Counted stage, e.g. clips extracted out of `total`.
    pub fn counter(&self, name: &str, total: u64) -> StageGuard {
        if self.mode == UiMode::Quiet {
            return StageGuard::new(name.to_string(), Feedback::Silent);
        }
        if self.pretty() {
            let bar = ProgressBar::new(total);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.set_message(name.to_string());
            StageGuard::new(name.to_string(), Feedback::Bar(bar))
        } else {
            eprintln!("==> {} ({} item(s))", name, total);
            StageGuard::new(name.to_string(), Feedback::Plain)
        }
    }
}

enum Feedback {
    Silent,
    Plain,
    Bar(ProgressBar),
}

pub struct StageGuard {
    name: String,
    start: Instant,
    feedback: Feedback,
    note: Option<String>,
}

impl StageGuard {
    fn new(name: String, feedback: Feedback) -> Self {
        Self {
            name,
            start: Instant::now(),
            feedback,
            note: None,
        }
    }

    /// Advance a counted stage. Safe to call from worker threads.
    pub fn inc(&self) {
        if let Feedback::Bar(bar) = &self.feedback {
            bar.inc(1);
        }
    }

    /// Shown next to the stage name when it finishes.
    pub fn note(&mut self, note: impl Into<String>) {
        self.note = Some(note.into());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.note {
            Some(note) => format!("✔ {}: {} ({})", self.name, note, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        match &self.feedback {
            Feedback::Silent => {}
            Feedback::Plain => eprintln!("{message}"),
            Feedback::Bar(bar) => bar.finish_with_message(message),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
