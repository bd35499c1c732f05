//! Correlation-engine data model: time ranges, ring bucketing, and results.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(EngineError::InvalidQuery(
                "time range end must be >= start".into(),
            ));
        }
        Ok(Self { start, end })
    }
}

/// Ring bucket configuration: `preRings` rings of `ringStep` length before
/// the core window, the core window itself (`coreWindowSize`), then
/// `postRings` rings of `ringStep` length after it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketConfig {
    pub core_window_size: Duration,
    pub pre_rings: u32,
    pub post_rings: u32,
    pub ring_step: Duration,
}

impl BucketConfig {
    pub fn ring_count(&self) -> usize {
        (self.pre_rings + 1 + self.post_rings) as usize
    }

    /// Computes the deterministic ring layout centered on `range`. Ring 0
    /// is the core window; `pre_rings` rings precede it and `post_rings`
    /// rings follow it.
    pub fn layout(&self, range: &TimeRange) -> Vec<TimeRange> {
        let center_start = range.start;
        let core_end = center_start + self.core_window_size;

        let mut rings = Vec::with_capacity(self.ring_count());

        for i in (0..self.pre_rings).rev() {
            let end = center_start - self.ring_step * (i as i32);
            let start = end - self.ring_step;
            rings.push(TimeRange { start, end });
        }

        rings.push(TimeRange {
            start: center_start,
            end: core_end,
        });

        for i in 0..self.post_rings {
            let start = core_end + self.ring_step * (i as i32);
            let end = start + self.ring_step;
            rings.push(TimeRange { start, end });
        }

        rings
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub min_anomaly_score: f64,
    #[serde(default)]
    pub min_correlation: f64,
    #[serde(default)]
    pub buckets: Option<BucketConfig>,
    #[serde(default)]
    pub default_query_limit: u64,
    #[serde(default)]
    pub probes: Vec<String>,
    #[serde(default)]
    pub service_candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateStats {
    pub pearson: f64,
    pub spearman: f64,
    pub cross_corr_max: f64,
    pub cross_corr_lag: i64,
    pub partial: f64,
    pub sample_size: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CauseCandidate {
    pub kpi_id: String,
    pub kpi_name: String,
    pub suspicion_score: f64,
    pub reasons: Vec<String>,
    pub stats: CandidateStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub causes: Vec<CauseCandidate>,
    pub affected_services: Vec<String>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ring_layout_is_deterministic_and_contiguous() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, start + Duration::minutes(2)).unwrap();
        let cfg = BucketConfig {
            core_window_size: Duration::minutes(2),
            pre_rings: 2,
            post_rings: 1,
            ring_step: Duration::minutes(1),
        };
        let rings = cfg.layout(&range);
        assert_eq!(rings.len(), 4);
        // rings are contiguous, core ring matches the input range
        for w in rings.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert_eq!(rings[2], range);
    }

    #[test]
    fn invalid_range_rejected() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeRange::new(start, start - Duration::seconds(1)).is_err());
    }
}
