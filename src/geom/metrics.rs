//! Opt-in timing/profiling hooks for the optimization loop.
//!
//! Zero-cost when the `metrics` feature is disabled (or on WASM, where
//! `std::time::Instant` isn't available): every call compiles to a no-op.
//!
//! # Usage
//!
//! ```ignore
//! let mut metrics = EngineMetrics::default();
//! metrics.begin();
//! let g = metrics.time(TimingBucket::Gradient, || energy.gradient(&mesh, true));
//! if let Some(report) = metrics.end() {
//!     println!("gradient: {} ns", report.gradient_ns);
//! }
//! ```

/// Categories for timing different phases of the optimization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingBucket {
    /// Gradient assembly (chart + scaffold).
    Gradient,
    /// Per-element Hessian assembly and SPD projection.
    Hessian,
    /// Symbolic/numeric factorization of the combined system.
    Factorization,
    /// Triangular solve plus line search.
    LineSearch,
    /// Topology edits (split/merge) and the scan for candidate operations.
    TopologyOp,
    /// Scaffold rebuild/resync.
    Scaffold,
    /// Mesh and weight-file I/O.
    Io,
}

/// Timing report with nanosecond precision for each bucket.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineTimingReport {
    pub gradient_ns: u64,
    pub hessian_ns: u64,
    pub factorization_ns: u64,
    pub line_search_ns: u64,
    pub topology_op_ns: u64,
    pub scaffold_ns: u64,
    pub io_ns: u64,
}

impl EngineTimingReport {
    #[must_use]
    pub fn total_ns(&self) -> u64 {
        self.gradient_ns
            .saturating_add(self.hessian_ns)
            .saturating_add(self.factorization_ns)
            .saturating_add(self.line_search_ns)
            .saturating_add(self.topology_op_ns)
            .saturating_add(self.scaffold_ns)
            .saturating_add(self.io_ns)
    }

    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total_ns() as f64 / 1_000_000.0
    }
}

/// Accumulator for timing engine phases. No-op unless the `metrics` feature
/// is enabled and the target isn't WASM.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    #[cfg(all(feature = "metrics", not(target_arch = "wasm32")))]
    report: EngineTimingReport,
}

impl EngineMetrics {
    pub fn begin(&mut self) {
        #[cfg(all(feature = "metrics", not(target_arch = "wasm32")))]
        {
            self.report = EngineTimingReport::default();
        }
    }

    #[must_use]
    pub fn end(&self) -> Option<EngineTimingReport> {
        #[cfg(all(feature = "metrics", not(target_arch = "wasm32")))]
        {
            Some(self.report.clone())
        }
        #[cfg(not(all(feature = "metrics", not(target_arch = "wasm32"))))]
        {
            None
        }
    }

    pub fn time<R>(&mut self, bucket: TimingBucket, f: impl FnOnce() -> R) -> R {
        #[cfg(all(feature = "metrics", not(target_arch = "wasm32")))]
        {
            let start = std::time::Instant::now();
            let result = f();
            let nanos = start.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
            self.add_to_bucket(bucket, nanos);
            result
        }
        #[cfg(not(all(feature = "metrics", not(target_arch = "wasm32"))))]
        {
            let _ = bucket;
            f()
        }
    }

    #[cfg(all(feature = "metrics", not(target_arch = "wasm32")))]
    fn add_to_bucket(&mut self, bucket: TimingBucket, nanos: u64) {
        let field = match bucket {
            TimingBucket::Gradient => &mut self.report.gradient_ns,
            TimingBucket::Hessian => &mut self.report.hessian_ns,
            TimingBucket::Factorization => &mut self.report.factorization_ns,
            TimingBucket::LineSearch => &mut self.report.line_search_ns,
            TimingBucket::TopologyOp => &mut self.report.topology_op_ns,
            TimingBucket::Scaffold => &mut self.report.scaffold_ns,
            TimingBucket::Io => &mut self.report.io_ns,
        };
        *field = field.saturating_add(nanos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_report_totals_sum_buckets() {
        let report = EngineTimingReport {
            gradient_ns: 1000,
            hessian_ns: 2000,
            ..EngineTimingReport::default()
        };
        assert_eq!(report.total_ns(), 3000);
        assert!((report.total_ms() - 0.003).abs() < 1e-9);
    }

    #[test]
    fn time_returns_closure_result_regardless_of_feature() {
        let mut metrics = EngineMetrics::default();
        metrics.begin();
        let result = metrics.time(TimingBucket::Gradient, || 42);
        assert_eq!(result, 42);
    }
}
