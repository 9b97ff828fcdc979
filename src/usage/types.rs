//! Data structures for usage metrics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Half-open date range for a usage query.
#[derive(Debug, Clone)]
pub struct UsageRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsageRange {
    /// The last `days` days, ending now.
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }
}

/// Aggregated usage for one range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Seconds of audio processed in the range
    #[serde(default)]
    pub seconds: f64,
    /// Number of API requests in the range
    #[serde(default)]
    pub requests: u64,
    /// Number of streaming sessions in the range
    #[serde(default)]
    pub streams: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_days_produces_ordered_range() {
        let range = UsageRange::last_days(7);
        assert!(range.start < range.end);
        assert_eq!((range.end - range.start).num_days(), 7);
    }

    #[test]
    fn test_summary_deserializes_with_defaults() {
        let summary: UsageSummary = serde_json::from_str(r#"{"seconds": 120.5}"#).unwrap();
        assert_eq!(summary.seconds, 120.5);
        assert_eq!(summary.requests, 0);
    }
}
