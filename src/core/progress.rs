//! Throttled progress reporting.
//!
//! Long operations feed `(current, total)` updates in here; the reporter
//! renders and forwards them to the status channel at most once per
//! configured interval, except the final 100% update which always goes out.
//! Render or send failures are logged and swallowed: a status update must
//! never abort the operation it reports on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::adapters::StatusSink;

/// Rate-bounded `(current, total)` reporter for one operation
pub struct ProgressReporter {
    sink: Arc<dyn StatusSink>,
    label: String,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn StatusSink>, label: impl Into<String>, interval: Duration) -> Self {
        Self {
            sink,
            label: label.into(),
            interval,
            last_emit: None,
        }
    }

    /// Report progress; emits only if the interval has elapsed since the
    /// last emission (the first update always emits)
    pub async fn update(&mut self, current: u64, total: u64) {
        if let Some(last) = self.last_emit {
            if last.elapsed() < self.interval {
                return;
            }
        }
        self.emit(current, total).await;
    }

    /// Unconditionally emit the final 100% update
    pub async fn finish(&mut self, total: u64) {
        self.emit(total, total).await;
    }

    async fn emit(&mut self, current: u64, total: u64) {
        let percent = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        let text = format!(
            "{}: {:.1}% ({}/{})",
            self.label, percent, current, total
        );

        if let Err(e) = self.sink.status(&text).await {
            warn!(error = %e, "progress update failed");
        }
        self.last_emit = Some(Instant::now());
    }
}
