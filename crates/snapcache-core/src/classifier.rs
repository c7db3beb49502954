//! Content-type accounting.
//!
//! [`ContentTypeTally`] counts responses by media type across all request
//! tasks. The tally is a cheap cloneable handle; every clone updates the
//! same counters.
//!
//! ## Report format
//!
//! ```text
//! text/html,12
//! image/png,7
//! unknown,1
//! ```
//!
//! Rows are ordered by descending count, ties alphabetically. There is no
//! header row.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::message::media_type;

/// Bucket for responses with no usable `Content-Type`.
pub const UNKNOWN_CONTENT_TYPE: &str = "unknown";

/// Shared running tally of responses per content type.
#[derive(Debug, Clone, Default)]
pub struct ContentTypeTally {
    counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl ContentTypeTally {
    /// Creates an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one response with the given `Content-Type` header value.
    pub fn classify(&self, content_type: Option<&str>) {
        let bucket = content_type
            .map(media_type)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_CONTENT_TYPE.to_string());

        *self.counts.lock().entry(bucket).or_insert(0) += 1;
    }

    /// Returns the count for one media type.
    pub fn count(&self, content_type: &str) -> u64 {
        self.counts.lock().get(content_type).copied().unwrap_or(0)
    }

    /// Returns the number of responses counted so far.
    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// Takes a sorted snapshot of the tally.
    pub fn report(&self) -> ContentTypeReport {
        let mut rows: Vec<(String, u64)> = self
            .counts
            .lock()
            .iter()
            .map(|(t, c)| (t.clone(), *c))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ContentTypeReport { rows }
    }

    /// Writes the current snapshot to `path`, replacing any previous report.
    pub fn flush(&self, path: &Path) -> Result<ContentTypeReport> {
        let report = self.report();
        report.write_to(path)?;
        tracing::debug!(
            "Flushed content-type report ({} types) to {:?}",
            report.rows().len(),
            path
        );
        Ok(report)
    }
}

/// A point-in-time copy of the tally, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeReport {
    rows: Vec<(String, u64)>,
}

impl ContentTypeReport {
    /// Returns `(content type, count)` rows in report order.
    pub fn rows(&self) -> &[(String, u64)] {
        &self.rows
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|(_, c)| c).sum()
    }

    /// Writes the report as `contentType,count` CSV lines.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        for (content_type, count) in &self.rows {
            let count = count.to_string();
            writer.write_record([content_type.as_str(), count.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }
}
