//! Optional per-call statistics for the anchor target pipeline.

use tracing::debug;

/// Summary of one target-assignment call, taken before scatter-back.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    pub total_anchors: usize,
    pub num_inside: usize,
    pub num_positive: usize,
    pub num_negative: usize,
    /// Componentwise sum of regression targets over positive anchors.
    pub fg_target_sum: [f32; 4],
    /// Componentwise sum of squared regression targets over positive anchors.
    pub fg_target_squared_sum: [f32; 4],
}

/// Receiver for per-call statistics. The unit sink `()` drops everything and
/// is the default for production calls.
pub trait StatsSink {
    fn record(&mut self, stats: &BatchStats);
}

impl StatsSink for () {
    fn record(&mut self, _stats: &BatchStats) {}
}

/// Running accumulators across calls, reported through `tracing` at debug
/// level: foreground target moments and average label balance.
#[derive(Debug, Default)]
pub struct RunningStats {
    sums: [f64; 4],
    squared_sums: [f64; 4],
    fg_count: f64,
    fg_total: u64,
    bg_total: u64,
    calls: u64,
}

impl StatsSink for RunningStats {
    fn record(&mut self, stats: &BatchStats) {
        for c in 0..4 {
            self.sums[c] += f64::from(stats.fg_target_sum[c]);
            self.squared_sums[c] += f64::from(stats.fg_target_squared_sum[c]);
        }
        self.fg_count += stats.num_positive as f64;
        self.fg_total += stats.num_positive as u64;
        self.bg_total += stats.num_negative as u64;
        self.calls += 1;

        let n = self.fg_count.max(f64::EPSILON);
        let mut means = [0.0f64; 4];
        let mut stdevs = [0.0f64; 4];
        for c in 0..4 {
            means[c] = self.sums[c] / n;
            stdevs[c] = (self.squared_sums[c] / n - means[c] * means[c]).max(0.0).sqrt();
        }

        debug!(?means, ?stdevs, "fg bbox target moments");
        debug!(
            fg_per_call = self.fg_total as f64 / self.calls as f64,
            bg_per_call = self.bg_total as f64 / self.calls as f64,
            num_inside = stats.num_inside,
            total_anchors = stats.total_anchors,
            "anchor label balance"
        );
    }
}
