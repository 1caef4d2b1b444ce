//! Streaming weighted mean/variance.
//!
//! Welford-style online accumulation: O(1) per observation, no sample
//! retention, and a `combine` that makes order-independent parallel reduction
//! possible (associative and commutative up to floating-point rounding).

/// Online accumulator for a weighted mean and variance.
#[derive(Debug, Clone, Default)]
pub struct OnlineStats {
    total_weight: f64,
    mean: f64,
    m2: f64,
}

impl OnlineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one weighted observation into the running statistics.
    ///
    /// Panics on a non-positive weight: that is a contract violation upstream,
    /// not a transient fault.
    pub fn add_value(&mut self, weight: f64, value: f64) {
        assert!(
            weight > 0.0,
            "non-positive weight {weight} passed to OnlineStats"
        );
        self.total_weight += weight;
        let delta = value - self.mean;
        self.mean += delta * (weight / self.total_weight);
        self.m2 += weight * delta * (value - self.mean);
    }

    /// Merges an independently accumulated instance into this one, as if all
    /// of its observations had been added here.
    pub fn combine(&mut self, other: &OnlineStats) {
        if other.total_weight == 0.0 {
            return;
        }
        if self.total_weight == 0.0 {
            *self = other.clone();
            return;
        }
        let total = self.total_weight + other.total_weight;
        let delta = other.mean - self.mean;
        self.mean += delta * (other.total_weight / total);
        self.m2 += other.m2 + delta * delta * (self.total_weight * other.total_weight / total);
        self.total_weight = total;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation of the observations seen so far.
    pub fn stddev(&self) -> f64 {
        if self.total_weight == 0.0 {
            0.0
        } else {
            (self.m2 / self.total_weight).sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matches_direct_computation_for_uniform_weights() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = OnlineStats::new();
        for &v in &values {
            stats.add_value(1.0, v);
        }
        assert_relative_eq!(stats.mean(), 5.0, epsilon = 1e-12);
        assert_relative_eq!(stats.stddev(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn weights_scale_contributions() {
        // Weighting a value twice must equal adding it twice.
        let mut doubled = OnlineStats::new();
        doubled.add_value(2.0, 3.0);
        doubled.add_value(1.0, 9.0);

        let mut repeated = OnlineStats::new();
        repeated.add_value(1.0, 3.0);
        repeated.add_value(1.0, 3.0);
        repeated.add_value(1.0, 9.0);

        assert_relative_eq!(doubled.mean(), repeated.mean(), epsilon = 1e-12);
        assert_relative_eq!(doubled.stddev(), repeated.stddev(), epsilon = 1e-12);
    }

    #[test]
    fn combine_equals_sequential_accumulation() {
        let values: Vec<f64> = (0..100).map(|i| (i as f64).sin() * 10.0).collect();

        let mut sequential = OnlineStats::new();
        for (i, &v) in values.iter().enumerate() {
            sequential.add_value(0.5 + (i % 3) as f64, v);
        }

        let mut left = OnlineStats::new();
        let mut right = OnlineStats::new();
        for (i, &v) in values.iter().enumerate() {
            let w = 0.5 + (i % 3) as f64;
            if i < 37 {
                left.add_value(w, v);
            } else {
                right.add_value(w, v);
            }
        }
        left.combine(&right);

        assert_relative_eq!(left.mean(), sequential.mean(), epsilon = 1e-9);
        assert_relative_eq!(left.stddev(), sequential.stddev(), epsilon = 1e-9);
    }

    #[test]
    fn combine_is_commutative() {
        let mut a = OnlineStats::new();
        let mut b = OnlineStats::new();
        for i in 0..10 {
            a.add_value(1.0, i as f64);
            b.add_value(2.0, (i * i) as f64);
        }

        let mut ab = a.clone();
        ab.combine(&b);
        let mut ba = b.clone();
        ba.combine(&a);

        assert_relative_eq!(ab.mean(), ba.mean(), epsilon = 1e-12);
        assert_relative_eq!(ab.stddev(), ba.stddev(), epsilon = 1e-12);
    }

    #[test]
    fn combine_with_empty_is_identity() {
        let mut stats = OnlineStats::new();
        stats.add_value(1.0, 42.0);
        let before_mean = stats.mean();
        stats.combine(&OnlineStats::new());
        assert_eq!(stats.mean(), before_mean);
    }

    #[test]
    #[should_panic(expected = "non-positive weight")]
    fn zero_weight_is_a_defect() {
        OnlineStats::new().add_value(0.0, 1.0);
    }
}
