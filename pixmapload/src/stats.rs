//! Converter statistics.

/// Counters for monitoring memoization and coalescing effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConverterStats {
    /// Total claims made against the converter
    pub total_requests: u64,
    /// Claims answered from the memo table
    pub hits: u64,
    /// Claims that joined an in-flight conversion
    pub coalesced: u64,
    /// Claims that became the leader for their key
    pub leaders: u64,
    /// Conversions published successfully
    pub conversions: u64,
    /// Conversions built from a persisted file instead of the raw image
    pub direct_path_conversions: u64,
    /// Conversions that published a failure
    pub failures: u64,
    /// Failures published before conversion, e.g. a failed fetch
    pub upstream_failures: u64,
    /// Memo entries evicted to stay within capacity
    pub evictions: u64,
}

impl ConverterStats {
    /// Fraction of requests served from the memo table (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits, self.total_requests)
    }

    /// Fraction of requests that joined in-flight work (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        ratio(self.coalesced, self.total_requests)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
