//! 📊 progress.rs: "Are we there yet?" for indexing runs.
//!
//! 🚀 Tracks how many references went by, how many bytes of the reference dump
//! that took, and how many came back failed. Renders it as a comfy-table message
//! riding on an indicatif bar.
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

const MIB: u64 = 1024 * 1024;

/// 📏 The sliding window rates are computed over.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Bytes, scaled to the size of the whole dump so the units don't jump around.
fn format_bytes(bytes: u64, total_size: u64) -> String {
    if total_size >= 512 * MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if total_size >= MIB {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 `1000000` → `"1,000,000"`. Used for the progress table and for result counts.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long nights.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Rates {
    refs_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Running totals plus a 5-second sliding window for rates.
pub(crate) struct ProgressMetrics {
    label: String,
    /// 📏 size of the reference dump in bytes, 0 when unknown (stdin, gzip)
    total_size: u64,
    bytes_read: u64,
    references: u64,
    failed: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ProgressBar has no Debug of its own
        f.debug_struct("ProgressMetrics")
            .field("label", &self.label)
            .field("total_size", &self.total_size)
            .field("bytes_read", &self.bytes_read)
            .field("references", &self.references)
            .field("failed", &self.failed)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 A visible bar. `total_size` is the dump size in bytes, 0 for "no idea".
    pub(crate) fn new(label: impl Into<String>, total_size: u64) -> Self {
        let progress_bar = ProgressBar::new(total_size);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);
        Self::with_bar(label.into(), total_size, progress_bar)
    }

    /// 🙈 Same bookkeeping, nothing drawn. For tests and non-interactive runs.
    pub(crate) fn hidden(label: impl Into<String>, total_size: u64) -> Self {
        Self::with_bar(label.into(), total_size, ProgressBar::hidden())
    }

    fn with_bar(label: String, total_size: u64, progress_bar: ProgressBar) -> Self {
        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        // seeded with t=0 so the first rate has something to diff against
        rate_samples.push_back((start_time, 0u64, 0u64));
        Self {
            label,
            total_size,
            bytes_read: 0,
            references: 0,
            failed: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Account for `references` more references that took `bytes` of the dump.
    pub(crate) fn update(&mut self, bytes: u64, references: u64) {
        self.bytes_read += bytes;
        self.references += references;
        let rates = self.calculate_rates(Instant::now());
        self.render(rates);
        self.progress_bar.set_position(self.bytes_read);
    }

    /// 💀 Account for references that came back from a flush as failed.
    pub(crate) fn record_failures(&mut self, failed: u64) {
        self.failed += failed;
    }

    pub(crate) fn references(&self) -> u64 {
        self.references
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed
    }

    /// ✅ Done. Leave the last frame on screen.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rates(&mut self, now: Instant) -> Rates {
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.bytes_read, self.references));

        let Some(&(oldest_time, oldest_bytes, oldest_refs)) = self.rate_samples.front() else {
            return Rates::default();
        };
        let elapsed = now.duration_since(oldest_time).as_secs_f64();
        if elapsed <= 0.0 {
            return Rates::default();
        }
        let bytes_delta = self.bytes_read.saturating_sub(oldest_bytes);
        let refs_delta = self.references.saturating_sub(oldest_refs);
        Rates {
            refs_per_sec: refs_delta as f64 / elapsed,
            mib_per_sec: (bytes_delta as f64 / elapsed) / MIB as f64,
        }
    }

    fn percent(&self) -> f64 {
        if self.total_size > 0 {
            (self.bytes_read as f64 / self.total_size as f64) * 100.0
        } else {
            0.0
        }
    }

    /// 🎨 The table on top of the bar:
    /// ```text
    /// | indexing: <label>
    /// | [=====>----------]
    ///   <refs/s>     <total refs>
    ///   <MiB/s>      <bytes progress>
    ///   <failed>     <%>
    ///   <elapsed>    <remaining>
    /// ```
    fn render(&self, rates: Rates) {
        let percent = self.percent();
        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 {
            // linear extrapolation from what we've read so far
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            let remaining_secs = total_estimated - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format_duration(Duration::from_secs_f64(remaining_secs))
            } else {
                "--:--".to_string()
            }
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Refs/s", format_number(rates.refs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Refs", format_number(self.references))).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {}",
                format_bytes(self.bytes_read, self.total_size),
                format_bytes(self.total_size, self.total_size)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} failed", format_number(self.failed))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", percent)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("indexing: {}\n{}", self.label, table));
    }
}
