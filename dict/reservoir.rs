//! Bounded weighted reservoir sampling.
//!
//! Approximates the distribution of a code's numeric values without storing
//! every observation. Admission follows Chao's rule: once the reservoir is
//! full, a new observation with weight `w` displaces a uniformly random slot
//! with probability `capacity * w / total_weight`, which keeps each item's
//! retention probability proportional to its weight. The exact sum of all
//! weights ever added is tracked separately from the retained samples, so
//! downstream bin weights never depend on which samples survived eviction.

use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReservoirSampler {
    capacity: usize,
    samples: Vec<f32>,
    total_weight: f64,
}

impl ReservoirSampler {
    /// Creates an empty reservoir. Panics on a zero capacity: that is a
    /// contract violation upstream, not a recoverable condition.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "reservoir capacity must be positive");
        Self {
            capacity,
            samples: Vec::new(),
            total_weight: 0.0,
        }
    }

    /// Offers one weighted observation to the reservoir.
    ///
    /// The running total weight is updated whether or not the value is
    /// admitted. Panics on a non-positive weight.
    pub fn add<R: Rng>(&mut self, value: f32, weight: f64, rng: &mut R) {
        assert!(
            weight > 0.0,
            "non-positive weight {weight} passed to ReservoirSampler"
        );
        self.total_weight += weight;
        self.admit(value, weight, rng);
    }

    /// Merges another reservoir into this one, as though all of its original
    /// observations had been offered here.
    ///
    /// Each retained sample of `other` stands in for an equal share of that
    /// side's total weight, so the admission odds account for both sides'
    /// weight and sample count rather than biasing toward the larger side.
    /// The final total weight is exactly the sum of both sides' totals.
    pub fn combine<R: Rng>(&mut self, other: &ReservoirSampler, rng: &mut R) {
        assert_eq!(
            self.capacity, other.capacity,
            "cannot combine reservoirs of different capacities"
        );
        let combined_weight = self.total_weight + other.total_weight;
        if !other.samples.is_empty() {
            let share = other.total_weight / other.samples.len() as f64;
            for &value in &other.samples {
                self.total_weight += share;
                self.admit(value, share, rng);
            }
        }
        // The per-sample shares accumulate rounding error; restore the exact sum.
        self.total_weight = combined_weight;
    }

    fn admit<R: Rng>(&mut self, value: f32, weight: f64, rng: &mut R) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            let admission = self.capacity as f64 * weight / self.total_weight;
            if rng.r#gen::<f64>() < admission {
                let slot = rng.gen_range(0..self.capacity);
                self.samples[slot] = value;
            }
        }
    }

    /// The retained values, at most `capacity` of them, in admission order.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// The exact running sum of every weight ever added, independent of
    /// eviction.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }
}
