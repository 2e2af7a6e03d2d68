//! Job progress state, throughput/ETA estimation and the status line.
//!
//! A [`ProgressTracker`] owns the [`ProgressState`] of one transfer. It keeps
//! `current_size` as a high-water mark, re-renders at most once per render
//! interval, and writes through a [`StatusSink`] so the same logic drives a
//! terminal line, a test buffer, or nothing at all.
//!
//! Status line with a known total:
//!
//! ```text
//! Copying rec_0412:  45.2% | 987.6 MiB / 2190.4 MiB | 112.5 MiB/s | ETA: 0:00:10
//! ```
//!
//! Without a total only the percent (when the tool reports one) is shown.

use std::time::{Duration, Instant};

const MIB: f64 = 1024.0 * 1024.0;

/// Bytes assumed per percentage point when nothing else is known.
///
/// This is a rough estimate carried over for percent-only transfers of
/// log and bag sets. It has no accuracy guarantee and is only ever
/// reported with an "estimated" label.
pub const ESTIMATED_BYTES_PER_PERCENT: u64 = 1024 * 1024;

/// Destination for rendered status lines.
pub trait StatusSink {
    /// Replace the current status line with `line`.
    fn render(&mut self, line: &str);

    /// Clear the status line and print the final `summary` on its own line.
    fn finish(&mut self, summary: &str);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn render(&mut self, _line: &str) {}
    fn finish(&mut self, _summary: &str) {}
}

/// Terminal sink backed by an indicatif spinner (requires `progress` feature).
///
/// The spinner message is the status line, so each render overwrites the
/// previous one in place.
#[cfg(feature = "progress")]
#[derive(Debug, Default)]
pub struct TerminalSink {
    bar: Option<indicatif::ProgressBar>,
}

#[cfg(feature = "progress")]
impl TerminalSink {
    /// Create a sink; the spinner appears on first render.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&mut self) -> &indicatif::ProgressBar {
        self.bar.get_or_insert_with(|| {
            let pb = indicatif::ProgressBar::new_spinner();
            if let Ok(style) = indicatif::ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(200));
            pb
        })
    }
}

#[cfg(feature = "progress")]
impl StatusSink for TerminalSink {
    fn render(&mut self, line: &str) {
        self.bar().set_message(line.to_owned());
    }

    fn finish(&mut self, summary: &str) {
        match self.bar.take() {
            Some(pb) => {
                pb.finish_and_clear();
                pb.println(summary);
            }
            None => println!("{summary}"),
        }
    }
}

/// Mutable progress of one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    /// Expected total bytes, `None` when unknown
    pub total_size: Option<u64>,
    /// Largest byte count observed so far
    pub current_size: u64,
    /// Largest percent observed on percent-only signals
    pub percent: Option<f64>,
    /// When the job started
    pub start_time: Instant,
    /// When the status line was last rendered
    pub last_display_time: Option<Instant>,
}

impl ProgressState {
    /// Fresh state starting at `start_time`; a zero total counts as unknown.
    #[must_use]
    pub fn new(total_size: Option<u64>, start_time: Instant) -> Self {
        Self {
            total_size: total_size.filter(|&t| t > 0),
            current_size: 0,
            percent: None,
            start_time,
            last_display_time: None,
        }
    }

    /// Raise the byte high-water mark, clamped to the total.
    pub fn record_bytes(&mut self, bytes: u64) {
        let bytes = match self.total_size {
            Some(total) => bytes.min(total),
            None => bytes,
        };
        self.current_size = self.current_size.max(bytes);
    }

    /// Raise the percent high-water mark, clamped to 0..=100.
    pub fn record_percent(&mut self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        self.percent = Some(self.percent.map_or(percent, |p| p.max(percent)));
    }

    /// Percent complete, from bytes when the total is known.
    pub fn percent_complete(&self) -> Option<f64> {
        match self.total_size {
            Some(total) => Some((self.current_size as f64 / total as f64 * 100.0).clamp(0.0, 100.0)),
            None => self.percent,
        }
    }

    /// Byte estimate for percent-only jobs ([`ESTIMATED_BYTES_PER_PERCENT`]).
    pub fn estimated_bytes(&self) -> Option<u64> {
        if self.total_size.is_some() || self.current_size > 0 {
            return None;
        }
        self.percent
            .map(|p| (p * ESTIMATED_BYTES_PER_PERCENT as f64).round() as u64)
    }
}

/// Derived rate figures for a moment in a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Bytes per second since start
    pub throughput: f64,
    /// Remaining time; `None` when the rate is zero or the total unknown
    pub eta: Option<Duration>,
}

/// Throughput is `current / elapsed`; ETA is `(total - current) / throughput`.
#[must_use]
pub fn estimate(total_size: Option<u64>, current_size: u64, elapsed: Duration) -> Estimate {
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        current_size as f64 / secs
    } else {
        0.0
    };
    let eta = match total_size {
        Some(total) if throughput > 0.0 => {
            let remaining = total.saturating_sub(current_size) as f64;
            Duration::try_from_secs_f64(remaining / throughput).ok()
        }
        _ => None,
    };
    Estimate { throughput, eta }
}

/// Format a duration as `H:MM:SS`.
#[must_use]
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn mib(bytes: f64) -> f64 {
    bytes / MIB
}

/// Tracks one transfer and renders its status line.
pub struct ProgressTracker<'a> {
    state: ProgressState,
    description: String,
    sink: &'a mut dyn StatusSink,
    render_interval: Duration,
    estimated: bool,
}

impl<'a> ProgressTracker<'a> {
    /// Start tracking now.
    pub fn new(description: impl Into<String>, total_size: Option<u64>, sink: &'a mut dyn StatusSink) -> Self {
        Self::starting_at(description, total_size, sink, Instant::now())
    }

    /// Start tracking at an explicit instant.
    pub fn starting_at(
        description: impl Into<String>,
        total_size: Option<u64>,
        sink: &'a mut dyn StatusSink,
        start: Instant,
    ) -> Self {
        Self {
            state: ProgressState::new(total_size, start),
            description: description.into(),
            sink,
            render_interval: Duration::from_secs(1),
            estimated: false,
        }
    }

    /// Minimum time between two renders.
    #[must_use]
    pub fn with_render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    /// Mark figures as time-based estimates rather than measurements.
    pub fn set_estimated(&mut self, estimated: bool) {
        self.estimated = estimated;
    }

    /// Current state.
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Record `bytes_transferred` and re-render if the interval has passed.
    pub fn update(&mut self, bytes_transferred: u64) {
        self.update_at(bytes_transferred, Instant::now());
    }

    /// [`update`](Self::update) with an explicit clock reading.
    pub fn update_at(&mut self, bytes_transferred: u64, now: Instant) {
        self.state.record_bytes(bytes_transferred);
        self.maybe_display(now);
    }

    /// Record a percent-only signal and re-render if the interval has passed.
    pub fn update_percent(&mut self, percent: f64) {
        self.update_percent_at(percent, Instant::now());
    }

    /// [`update_percent`](Self::update_percent) with an explicit clock reading.
    pub fn update_percent_at(&mut self, percent: f64, now: Instant) {
        self.state.record_percent(percent);
        self.maybe_display(now);
    }

    /// Mark a known total as fully transferred.
    pub fn complete(&mut self) {
        if let Some(total) = self.state.total_size {
            self.state.record_bytes(total);
        } else if self.state.percent.is_some() {
            self.state.record_percent(100.0);
        }
    }

    fn maybe_display(&mut self, now: Instant) {
        let due = self
            .state
            .last_display_time
            .is_none_or(|last| now.saturating_duration_since(last) >= self.render_interval);
        if due {
            self.state.last_display_time = Some(now);
            self.display_at(now);
        }
    }

    /// Render the status line now.
    pub fn display(&mut self) {
        self.display_at(Instant::now());
    }

    /// Render the status line as of `now`.
    pub fn display_at(&mut self, now: Instant) {
        let line = self.status_line(now);
        self.sink.render(&line);
    }

    /// The status line as of `now`.
    pub fn status_line(&self, now: Instant) -> String {
        let marker = if self.estimated { "~" } else { "" };
        let elapsed = now.saturating_duration_since(self.state.start_time);
        match self.state.total_size {
            Some(total) => {
                let current = self.state.current_size;
                let est = estimate(Some(total), current, elapsed);
                let eta = est.eta.map_or_else(|| "∞".to_owned(), format_hms);
                format!(
                    "{}: {}{:5.1}% | {:6.1} MiB / {:6.1} MiB | {:5.1} MiB/s | ETA: {}",
                    self.description,
                    marker,
                    self.state.percent_complete().unwrap_or(0.0),
                    mib(current as f64),
                    mib(total as f64),
                    mib(est.throughput),
                    eta
                )
            }
            None => match self.state.percent {
                Some(percent) => format!("{}: {}{:5.1}%", self.description, marker, percent),
                None if self.state.current_size > 0 => format!(
                    "{}: {:.1} MiB transferred",
                    self.description,
                    mib(self.state.current_size as f64)
                ),
                None => format!("{}: waiting for progress...", self.description),
            },
        }
    }

    /// Emit the final summary line and return the final state.
    pub fn finish(self) -> ProgressState {
        self.finish_at(Instant::now())
    }

    /// [`finish`](Self::finish) with an explicit clock reading.
    pub fn finish_at(self, now: Instant) -> ProgressState {
        let summary = self.summary_line(now);
        self.sink.finish(&summary);
        self.state
    }

    /// Emit a summary for a transfer that did not complete, e.g.
    /// `"Copying rec1 cancelled after 4.2s"`, and return the final state.
    pub fn abandon(self, outcome: &str) -> ProgressState {
        let secs = self.state.start_time.elapsed().as_secs_f64();
        self.sink
            .finish(&format!("{} {outcome} after {secs:.1}s", self.description));
        self.state
    }

    /// Final summary: elapsed time and, with a known total, the average
    /// rate `total_size / total_elapsed`.
    pub fn summary_line(&self, now: Instant) -> String {
        let elapsed = now.saturating_duration_since(self.state.start_time);
        let secs = elapsed.as_secs_f64();
        match self.state.total_size {
            Some(total) if secs > 0.0 => format!(
                "{} completed in {:.1}s | Average speed: {:.1} MiB/s",
                self.description,
                secs,
                mib(total as f64) / secs
            ),
            _ => format!("{} completed in {:.1}s", self.description, secs),
        }
    }
}
