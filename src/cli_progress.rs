/*!
 * CLI progress renderer for interactive terminal display
 *
 * Polls the engine's [`TransferCounters`] on a background thread and renders
 * them as a single `indicatif` bar: jobs finished out of jobs known, plus
 * bytes moved and the current transfer rate.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::stats::{format_duration, CounterSnapshot, TransferCounters};

const REFRESH: Duration = Duration::from_millis(300);
const TEMPLATE: &str = "[{elapsed_precise}] {bar:60.cyan/blue} {pos:>7}/{len:7} {msg}";

/// Background progress bar, stopped on drop
pub struct ProgressMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start rendering; a disabled monitor draws nothing
    pub fn spawn(counters: Arc<TransferCounters>, enabled: bool) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        if !enabled {
            return Self { stop, handle: None };
        }

        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);

        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("shardline-progress".to_string())
            .spawn(move || render_loop(bar, counters, flag))
            .ok();

        Self { stop, handle }
    }

    /// Draw the final state and stop the thread
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_loop(bar: ProgressBar, counters: Arc<TransferCounters>, stop: Arc<AtomicBool>) {
    let started = Instant::now();
    loop {
        let done = stop.load(Ordering::Acquire);
        let snap = counters.snapshot();
        bar.set_length(snap.required_count);
        bar.set_position(snap.finished());
        bar.set_message(status_line(&snap, started.elapsed()));

        if done {
            bar.finish();
            return;
        }
        thread::sleep(REFRESH);
    }
}

/// Message shown right of the bar
pub fn status_line(snap: &CounterSnapshot, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (snap.transferred_bytes as f64 / secs) as u64
    } else {
        0
    };
    let mut line = format!(
        "{} / {} | {}/s",
        HumanBytes(snap.done_bytes()),
        HumanBytes(snap.required_bytes),
        HumanBytes(rate)
    );
    if snap.failed_count > 0 {
        line.push_str(&format!(" | {} failed", snap.failed_count));
    }
    if elapsed >= Duration::from_secs(1) {
        line.push_str(&format!(" | {}", format_duration(elapsed)));
    }
    line
}
