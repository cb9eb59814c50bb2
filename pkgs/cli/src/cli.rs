use clap::Args;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use pageheap_core::{HeapConfig, LayoutKind, config};
use std::{num::NonZeroUsize, time::Duration};

/// Minimal number of operations in a phase before a progress bar is shown.
pub const PROGRESS_BAR_THRESHOLD: usize = 100_000;

/// Heap construction flags shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct HeapArgs {
    /// Row width as a power of two
    #[arg(long, default_value_t = config::DEFAULT_ROW_SHIFT)]
    pub row_shift: u32,

    /// VM page size in slots [default: host page size / pointer size]
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Initial number of row directory entries
    #[arg(long, default_value_t = config::DEFAULT_INITIAL_ROWS)]
    pub initial_rows: NonZeroUsize,

    /// Use the flat 2u/2u+1 numbering instead of the page-aware one
    #[arg(long)]
    pub flat: bool,
}

impl HeapArgs {
    pub fn to_config(&self) -> HeapConfig {
        let mut config = HeapConfig::default()
            .with_row_shift(self.row_shift)
            .with_initial_rows(self.initial_rows)
            .with_layout(if self.flat {
                LayoutKind::Flat
            } else {
                LayoutKind::Paged
            });
        if let Some(page_size) = self.page_size {
            config = config.with_page_size(page_size);
        }
        config
    }
}

/// Initializes `env_logger` (default level `info`) behind a progress-bar aware bridge.
pub fn init_logging() -> MultiProgress {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let level = logger.filter();
    let progress = MultiProgress::new();

    if LogWrapper::new(progress.clone(), logger).try_init().is_ok() {
        log::set_max_level(level);
    }
    progress
}

pub fn should_use_progress_bar(num_ops: usize) -> bool {
    num_ops >= PROGRESS_BAR_THRESHOLD
}

pub fn create_progress_bar(progress: &MultiProgress, len: usize, label: &str) -> ProgressBar {
    let pb = progress.add(ProgressBar::new(len as u64));
    pb.set_style(
        ProgressStyle::with_template("{prefix:>10} [{bar:40}] {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_prefix(label.to_string());
    pb
}

pub fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {:02}.{:03}s", secs / 60, secs % 60, d.subsec_millis())
    } else if secs >= 1 {
        format!("{:.3} s", d.as_secs_f64())
    } else if d.as_millis() >= 1 {
        format!("{} ms", d.as_millis())
    } else {
        format!("{} µs", d.as_micros())
    }
}

/// Formats an operation rate, e.g. `12.3M ops/s`.
pub fn human_rate(ops: usize, d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    let rate = ops as f64 / secs;
    if rate >= 1e6 {
        format!("{:.1}M ops/s", rate / 1e6)
    } else if rate >= 1e3 {
        format!("{:.1}k ops/s", rate / 1e3)
    } else {
        format!("{:.0} ops/s", rate)
    }
}

#[macro_export]
macro_rules! measure_time {
    ($block:block) => {{
        let start = std::time::Instant::now();
        let result = { $block };
        (result, start.elapsed())
    }};
}
