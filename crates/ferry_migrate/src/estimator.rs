//! Sample-based duration and resource estimation.
//!
//! The estimator extrapolates from a small sample of processed items to the
//! whole job. Confidence is graded by sample size and by how much the
//! per-item timings vary (coefficient of variation).

use crate::error::{MigrateError, MigrateResult};
use crate::io::RecordSource;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Sample size from which confidence can reach [`ConfidenceLevel::High`].
pub const HIGH_CONFIDENCE_SAMPLES: usize = 20;

/// Sample size from which confidence reaches [`ConfidenceLevel::Medium`].
pub const MEDIUM_CONFIDENCE_SAMPLES: usize = 5;

/// One processed item in a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleItem {
    /// Size of the item in bytes.
    pub size_bytes: u64,
    /// Time spent processing the item.
    pub elapsed: Duration,
}

impl SampleItem {
    /// Creates a sample item.
    pub fn new(size_bytes: u64, elapsed: Duration) -> Self {
        Self {
            size_bytes,
            elapsed,
        }
    }
}

/// How much an estimate can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Tiny sample; treat as a rough guess.
    Low,
    /// Reasonable sample, or large but noisy.
    Medium,
    /// Large, consistent sample.
    High,
}

/// Estimator tuning.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Expected compressed/raw size ratio.
    pub compression_ratio: f64,
    /// Memory the migration may use for in-flight batches.
    pub memory_budget_bytes: u64,
    /// Coefficient of variation above which timings count as noisy.
    pub variation_threshold: f64,
    /// Smallest batch size the estimator recommends.
    pub min_batch_size: usize,
    /// Largest batch size the estimator recommends.
    pub max_batch_size: usize,
    /// Environment hint that overrides the budget check when set.
    pub memory_hint: Option<bool>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            compression_ratio: 0.6,
            memory_budget_bytes: 64 * 1024 * 1024,
            variation_threshold: 0.5,
            min_batch_size: 50,
            max_batch_size: 500,
            memory_hint: None,
        }
    }
}

impl EstimatorConfig {
    /// Sets the memory budget.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    /// Sets the expected compression ratio.
    pub fn with_compression_ratio(mut self, ratio: f64) -> Self {
        self.compression_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Forces the memory availability hint.
    pub fn with_memory_hint(mut self, available: bool) -> Self {
        self.memory_hint = Some(available);
        self
    }

    /// Sets the recommended batch size bounds.
    pub fn with_batch_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_batch_size = min.max(1);
        self.max_batch_size = max.max(self.min_batch_size);
        self
    }
}

/// Projection of a whole migration from a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEstimation {
    /// Projected wall time for every item in the job.
    pub estimated_duration: Duration,
    /// Projected completion instant (Unix millis).
    pub estimated_completion_time: u64,
    /// Total data size in bytes.
    pub total_data_size: u64,
    /// Projected size after compression.
    pub compressed_size: u64,
    /// Mean wall time per sampled item.
    pub average_item_processing_time: Duration,
    /// Number of items in the sample.
    pub sample_size: usize,
    /// Measured items per second.
    pub throughput: f64,
    /// Whether a default-size batch fits the memory budget.
    pub memory_available: bool,
    /// Batch size suited to the observed item size.
    pub recommended_batch_size: usize,
    /// Trust grade of this estimate.
    pub confidence_level: ConfidenceLevel,
    /// Human-readable caveats.
    pub warnings: Vec<String>,
}

/// What is being estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EstimationTarget {
    /// Items in the whole job.
    pub total_items: u64,
    /// Items already migrated.
    pub completed_items: u64,
    /// Known total size, if the source reports one.
    pub total_bytes: Option<u64>,
}

impl EstimationTarget {
    /// Target for a job with nothing migrated yet.
    pub fn new(total_items: u64) -> Self {
        Self {
            total_items,
            completed_items: 0,
            total_bytes: None,
        }
    }

    /// Sets the known total size.
    pub fn with_total_bytes(mut self, bytes: u64) -> Self {
        self.total_bytes = Some(bytes);
        self
    }

    /// Sets how many items are already done.
    pub fn with_completed(mut self, completed: u64) -> Self {
        self.completed_items = completed.min(self.total_items);
        self
    }
}

/// Produces [`MigrationEstimation`]s from samples.
#[derive(Debug, Clone, Default)]
pub struct SampleEstimator {
    config: EstimatorConfig,
}

impl SampleEstimator {
    /// Creates an estimator.
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimates the job described by `target` from `sample`, which took
    /// `sample_duration` of wall time to process.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::InsufficientSample`] if `sample` is empty.
    pub fn estimate(
        &self,
        target: EstimationTarget,
        sample: &[SampleItem],
        sample_duration: Duration,
    ) -> MigrateResult<MigrationEstimation> {
        if sample.is_empty() {
            return Err(MigrateError::InsufficientSample);
        }
        let n = sample.len();
        let mut warnings = Vec::new();

        let sample_bytes: u64 = sample.iter().map(|item| item.size_bytes).sum();
        let avg_item_size = sample_bytes / n as u64;

        let total_data_size = match target.total_bytes {
            Some(bytes) => bytes,
            None => {
                if target.total_items > n as u64 {
                    warnings.push("total size extrapolated from sample item sizes".to_string());
                }
                avg_item_size.saturating_mul(target.total_items)
            }
        };
        let compressed_size = (total_data_size as f64 * self.config.compression_ratio).round() as u64;

        let avg_item_secs = sample_duration.as_secs_f64() / n as f64;
        let average_item_processing_time = Duration::from_secs_f64(avg_item_secs);
        let estimated_duration = Duration::from_secs_f64(avg_item_secs * target.total_items as f64);
        let remaining = target.total_items.saturating_sub(target.completed_items);
        let remaining_ms = (avg_item_secs * remaining as f64 * 1000.0) as u64;
        let estimated_completion_time = now_millis().saturating_add(remaining_ms);

        let throughput = if sample_duration.is_zero() {
            warnings.push("sample finished too quickly to measure throughput".to_string());
            0.0
        } else {
            n as f64 / sample_duration.as_secs_f64()
        };

        let variation = coefficient_of_variation(sample);
        let noisy = variation >= self.config.variation_threshold;
        if noisy {
            warnings.push(format!(
                "per-item timings vary widely (coefficient of variation {variation:.2})"
            ));
        }

        let confidence_level = if n >= HIGH_CONFIDENCE_SAMPLES && !noisy {
            ConfidenceLevel::High
        } else if n >= MEDIUM_CONFIDENCE_SAMPLES {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };
        if n < HIGH_CONFIDENCE_SAMPLES {
            warnings.push(format!(
                "sample of {n} item(s) is small; estimate may be inaccurate"
            ));
        }

        let batch_bytes = avg_item_size.saturating_mul(crate::config::DEFAULT_BATCH_SIZE as u64);
        let memory_available = self
            .config
            .memory_hint
            .unwrap_or(batch_bytes <= self.config.memory_budget_bytes);
        let recommended_batch_size = if memory_available {
            self.recommend_batch_size(avg_item_size)
        } else {
            warnings.push(format!(
                "memory is constrained (a batch of {} items needs ~{batch_bytes} bytes, budget {}); use smaller batches",
                crate::config::DEFAULT_BATCH_SIZE,
                self.config.memory_budget_bytes
            ));
            self.config.min_batch_size
        };

        Ok(MigrationEstimation {
            estimated_duration,
            estimated_completion_time,
            total_data_size,
            compressed_size,
            average_item_processing_time,
            sample_size: n,
            throughput,
            memory_available,
            recommended_batch_size,
            confidence_level,
            warnings,
        })
    }

    /// Times reading the first `sample_size` records of `source` and
    /// estimates the whole source from them.
    pub fn estimate_source<S: RecordSource + ?Sized>(
        &self,
        source: &S,
        sample_size: usize,
    ) -> MigrateResult<MigrationEstimation> {
        let keys = source.keys()?;
        let mut target = EstimationTarget::new(keys.len() as u64);
        if let Some(bytes) = source.total_bytes_hint() {
            target = target.with_total_bytes(bytes);
        }

        let started = Instant::now();
        let mut sample = Vec::with_capacity(sample_size.min(keys.len()));
        for key in keys.iter().take(sample_size) {
            let item_started = Instant::now();
            let records = source.read_batch(std::slice::from_ref(key))?;
            let size = records.iter().map(|r| r.size()).sum();
            sample.push(SampleItem::new(size, item_started.elapsed()));
        }

        self.estimate(target, &sample, started.elapsed())
    }

    fn recommend_batch_size(&self, avg_item_size: u64) -> usize {
        // Keep four batches in flight within the budget.
        let per_batch = self.config.memory_budget_bytes / 4;
        let fit = per_batch.checked_div(avg_item_size).unwrap_or(u64::MAX);
        usize::try_from(fit)
            .unwrap_or(usize::MAX)
            .clamp(self.config.min_batch_size, self.config.max_batch_size)
    }
}

fn coefficient_of_variation(sample: &[SampleItem]) -> f64 {
    let n = sample.len() as f64;
    let mean = sample.iter().map(|s| s.elapsed.as_secs_f64()).sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = sample
        .iter()
        .map(|s| {
            let d = s.elapsed.as_secs_f64() - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(n: usize, size: u64, ms: u64) -> Vec<SampleItem> {
        (0..n)
            .map(|_| SampleItem::new(size, Duration::from_millis(ms)))
            .collect()
    }

    fn total(sample: &[SampleItem]) -> Duration {
        sample.iter().map(|s| s.elapsed).sum()
    }

    #[test]
    fn empty_sample_rejected() {
        let estimator = SampleEstimator::default();
        assert!(matches!(
            estimator.estimate(EstimationTarget::new(10), &[], Duration::ZERO),
            Err(MigrateError::InsufficientSample)
        ));
    }

    #[test]
    fn projects_duration_from_average() {
        let estimator = SampleEstimator::default();
        let sample = uniform(20, 1_000, 10);
        let estimation = estimator
            .estimate(EstimationTarget::new(1_000), &sample, total(&sample))
            .unwrap();

        assert_eq!(estimation.estimated_duration, Duration::from_secs(10));
        assert_eq!(estimation.total_data_size, 1_000_000);
        assert_eq!(estimation.compressed_size, 600_000);
        assert!((estimation.throughput - 100.0).abs() < 1e-6);
        assert_eq!(estimation.average_item_processing_time, Duration::from_millis(10));
        assert_eq!(estimation.sample_size, 20);
        assert_eq!(estimation.confidence_level, ConfidenceLevel::High);
        assert!(estimation.memory_available);
        assert!(estimation.estimated_completion_time >= now_millis());
    }

    #[test]
    fn known_total_size_wins() {
        let estimator = SampleEstimator::default();
        let sample = uniform(20, 10, 1);
        let estimation = estimator
            .estimate(
                EstimationTarget::new(100).with_total_bytes(5_000),
                &sample,
                total(&sample),
            )
            .unwrap();
        assert_eq!(estimation.total_data_size, 5_000);
        assert_eq!(estimation.compressed_size, 3_000);
    }

    #[test]
    fn small_sample_is_low_confidence_with_warning() {
        let estimator = SampleEstimator::default();
        let sample = uniform(3, 100, 5);
        let estimation = estimator
            .estimate(EstimationTarget::new(50), &sample, total(&sample))
            .unwrap();
        assert_eq!(estimation.confidence_level, ConfidenceLevel::Low);
        assert!(estimation.warnings.iter().any(|w| w.contains("small")));
    }

    #[test]
    fn noisy_sample_caps_confidence() {
        let estimator = SampleEstimator::default();
        let mut sample = uniform(15, 100, 1);
        sample.extend(uniform(15, 100, 50));
        let estimation = estimator
            .estimate(EstimationTarget::new(100), &sample, total(&sample))
            .unwrap();
        assert_eq!(estimation.confidence_level, ConfidenceLevel::Medium);
        assert!(estimation.warnings.iter().any(|w| w.contains("vary")));
    }

    #[test]
    fn zero_duration_sample_has_zero_throughput() {
        let estimator = SampleEstimator::default();
        let sample = uniform(25, 100, 0);
        let estimation = estimator
            .estimate(EstimationTarget::new(100), &sample, Duration::ZERO)
            .unwrap();
        assert_eq!(estimation.throughput, 0.0);
        assert_eq!(estimation.estimated_duration, Duration::ZERO);
        assert!(!estimation.warnings.is_empty());
    }

    #[test]
    fn large_items_exhaust_memory_budget() {
        let estimator =
            SampleEstimator::new(EstimatorConfig::default().with_memory_budget(1024 * 1024));
        let sample = uniform(20, 100 * 1024, 2);
        let estimation = estimator
            .estimate(EstimationTarget::new(100), &sample, total(&sample))
            .unwrap();
        assert!(!estimation.memory_available);
        assert_eq!(estimation.recommended_batch_size, 50);
        assert!(estimation.warnings.iter().any(|w| w.contains("budget")));
    }

    #[test]
    fn memory_hint_overrides_budget() {
        let estimator = SampleEstimator::new(EstimatorConfig::default().with_memory_hint(false));
        let sample = uniform(20, 10, 1);
        let estimation = estimator
            .estimate(EstimationTarget::new(100), &sample, total(&sample))
            .unwrap();
        assert!(!estimation.memory_available);
        assert!(estimation.warnings.iter().any(|w| w.contains("smaller batches")));
    }

    #[test]
    fn batch_size_recommendation_is_clamped() {
        let estimator = SampleEstimator::default();

        let tiny = uniform(20, 10, 1);
        let estimation = estimator
            .estimate(EstimationTarget::new(100), &tiny, total(&tiny))
            .unwrap();
        assert_eq!(estimation.recommended_batch_size, 500);

        let big = uniform(20, 256 * 1024, 1);
        let estimation = estimator
            .estimate(EstimationTarget::new(100), &big, total(&big))
            .unwrap();
        assert_eq!(estimation.recommended_batch_size, 64);
    }

    #[test]
    fn confidence_never_drops_when_sample_grows() {
        let estimator = SampleEstimator::default();
        let mut previous = ConfidenceLevel::Low;
        for n in 1..60 {
            let sample = uniform(n, 100, 3);
            let estimation = estimator
                .estimate(EstimationTarget::new(1_000), &sample, total(&sample))
                .unwrap();
            assert!(estimation.confidence_level >= previous);
            previous = estimation.confidence_level;
        }
        assert_eq!(previous, ConfidenceLevel::High);
    }
}
