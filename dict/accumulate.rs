// ========================================================================================
//                           Shard-local dictionary accumulation
// ========================================================================================
//
// One `DictionaryAccumulator` is owned exclusively by the shard task that
// builds it. Every patient contributes a total weight of exactly
// 1/num_patients, split evenly across that patient's qualifying events, so a
// patient with a massive timeline counts no more than one with a single
// visit. `absorb` folds a finished shard into the running global result and
// is the only point where two accumulators ever meet.

use crate::flatmap::FlatMap;
use crate::ontology::Ontology;
use crate::reservoir::ReservoirSampler;
use crate::stats::OnlineStats;
use crate::types::{Event, EventValue, Patient};
use ahash::AHashMap;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Numeric observations retained per code. Plenty for stable decile edges
/// while bounding memory on high-volume lab codes.
pub const RESERVOIR_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct DictionaryAccumulator {
    pub age_stats: OnlineStats,
    /// Rollup-inclusive weights: an event's weight lands on every inclusive
    /// ancestor of its code.
    pub hierarchical_code_counts: FlatMap<f64>,
    /// Leaf weights: the event's own code only, never rolled up.
    pub code_counts: FlatMap<f64>,
    pub text_counts: FlatMap<AHashMap<String, f64>>,
    pub numeric_samples: FlatMap<ReservoirSampler>,
    rng: StdRng,
}

impl DictionaryAccumulator {
    /// Builds an empty accumulator with its own private random source.
    ///
    /// Every shard must get a distinct seed; the seed also feeds the merge
    /// decisions made when this accumulator is the destination of `absorb`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            age_stats: OnlineStats::new(),
            hierarchical_code_counts: FlatMap::new(),
            code_counts: FlatMap::new(),
            text_counts: FlatMap::new(),
            numeric_samples: FlatMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Folds one patient's timeline into this accumulator.
    ///
    /// Events with banned codes or unique free text do not qualify; the
    /// remaining k events get `1/(num_patients * k)` each, so the patient's
    /// total contribution is exactly `1/num_patients` before ontology
    /// fan-out. A patient with no qualifying events contributes nothing.
    pub fn add_patient(
        &mut self,
        patient: &Patient,
        ontology: &Ontology,
        num_patients: usize,
        banned_codes: &FlatMap<bool>,
    ) {
        let qualifies = |event: &Event| {
            banned_codes.find(event.code).is_none()
                && !matches!(event.value, EventValue::UniqueText(_))
        };

        let qualifying_events = patient.events.iter().filter(|e| qualifies(e)).count();
        if qualifying_events == 0 {
            return;
        }
        let weight = 1.0 / (num_patients as f64 * qualifying_events as f64);

        for event in patient.events.iter().filter(|e| qualifies(e)) {
            self.age_stats.add_value(weight, event.age as f64);

            match &event.value {
                EventValue::None => {
                    for &parent in ontology.get_all_parents(event.code) {
                        *self.hierarchical_code_counts.find_or_insert(parent, 0.0) += weight;
                    }
                    *self.code_counts.find_or_insert(event.code, 0.0) += weight;
                }
                EventValue::Numeric(value) => {
                    self.numeric_samples
                        .find_or_insert(event.code, ReservoirSampler::new(RESERVOIR_CAPACITY))
                        .add(*value, weight, &mut self.rng);
                }
                EventValue::SharedText(text) => {
                    *self
                        .text_counts
                        .find_or_insert(event.code, AHashMap::new())
                        .entry(text.clone())
                        .or_insert(0.0) += weight;
                }
                // Filtered out above; the kind set is closed.
                EventValue::UniqueText(_) => unreachable!(),
            }
        }
    }

    /// Folds a finished shard accumulator into this one.
    ///
    /// Pairwise or tree reduction over shards through this method equals
    /// sequential single-pass accumulation, up to floating-point ordering.
    /// Reservoir merges draw entropy from this (the destination) side's
    /// random source only.
    pub fn absorb(&mut self, other: DictionaryAccumulator) {
        self.age_stats.combine(&other.age_stats);

        for (code, weight) in other.code_counts.into_entries() {
            *self.code_counts.find_or_insert(code, 0.0) += weight;
        }

        for (code, weight) in other.hierarchical_code_counts.into_entries() {
            *self.hierarchical_code_counts.find_or_insert(code, 0.0) += weight;
        }

        for (code, texts) in other.text_counts.into_entries() {
            let target = self.text_counts.find_or_insert(code, AHashMap::new());
            for (text, weight) in texts {
                *target.entry(text).or_insert(0.0) += weight;
            }
        }

        for (code, samples) in other.numeric_samples.into_entries() {
            self.numeric_samples
                .find_or_insert(code, ReservoirSampler::new(RESERVOIR_CAPACITY))
                .combine(&samples, &mut self.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Code;
    use approx::assert_relative_eq;

    fn event(code: u32, value: EventValue) -> Event {
        Event {
            age: 100.0,
            code: Code(code),
            value,
        }
    }

    fn patient(id: u32, events: Vec<Event>) -> Patient {
        Patient {
            patient_id: id,
            events,
        }
    }

    #[test]
    fn qualifying_events_share_the_patient_weight_equally() {
        let ontology = Ontology::from_edges(&[], 4);
        let banned = FlatMap::new();
        let mut acc = DictionaryAccumulator::with_seed(0);

        let p = patient(
            0,
            vec![
                event(0, EventValue::None),
                event(1, EventValue::None),
                event(2, EventValue::UniqueText("note".into())),
            ],
        );
        acc.add_patient(&p, &ontology, 5, &banned);

        // Two qualifying events out of three: each gets 1/(5*2).
        assert_relative_eq!(*acc.code_counts.find(Code(0)).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(*acc.code_counts.find(Code(1)).unwrap(), 0.1, epsilon = 1e-12);
        assert!(acc.code_counts.find(Code(2)).is_none());
    }

    #[test]
    fn banned_codes_do_not_dilute_the_patient_weight() {
        let ontology = Ontology::from_edges(&[], 4);
        let mut banned = FlatMap::new();
        banned.insert(Code(3), true);
        let mut acc = DictionaryAccumulator::with_seed(0);

        let p = patient(
            0,
            vec![event(0, EventValue::None), event(3, EventValue::None)],
        );
        acc.add_patient(&p, &ontology, 2, &banned);

        // The sole qualifying event carries the full 1/num_patients.
        assert_relative_eq!(*acc.code_counts.find(Code(0)).unwrap(), 0.5, epsilon = 1e-12);
        assert!(acc.code_counts.find(Code(3)).is_none());
        assert!(acc.hierarchical_code_counts.find(Code(3)).is_none());
    }

    #[test]
    fn a_patient_with_no_qualifying_events_contributes_nothing() {
        let ontology = Ontology::from_edges(&[], 2);
        let banned = FlatMap::new();
        let mut acc = DictionaryAccumulator::with_seed(0);

        let p = patient(0, vec![event(0, EventValue::UniqueText("only".into()))]);
        acc.add_patient(&p, &ontology, 3, &banned);

        assert!(acc.code_counts.keys().next().is_none());
        assert_eq!(acc.age_stats.stddev(), 0.0);
    }

    #[test]
    fn bare_codes_roll_up_to_all_inclusive_ancestors() {
        // C(2) -> B(1) -> A(0)
        let ontology = Ontology::from_edges(&[(Code(2), Code(1)), (Code(1), Code(0))], 3);
        let banned = FlatMap::new();
        let mut acc = DictionaryAccumulator::with_seed(0);

        acc.add_patient(
            &patient(0, vec![event(2, EventValue::None)]),
            &ontology,
            1,
            &banned,
        );

        for code in [0, 1, 2] {
            assert_relative_eq!(
                *acc.hierarchical_code_counts.find(Code(code)).unwrap(),
                1.0,
                epsilon = 1e-12
            );
        }
        // Leaf counts stay on the event's own code.
        assert_relative_eq!(*acc.code_counts.find(Code(2)).unwrap(), 1.0, epsilon = 1e-12);
        assert!(acc.code_counts.find(Code(1)).is_none());
    }

    #[test]
    fn numeric_and_text_values_land_in_their_own_maps() {
        let ontology = Ontology::from_edges(&[], 4);
        let banned = FlatMap::new();
        let mut acc = DictionaryAccumulator::with_seed(0);

        let p = patient(
            0,
            vec![
                event(0, EventValue::Numeric(7.25)),
                event(1, EventValue::SharedText("positive".into())),
                event(1, EventValue::SharedText("positive".into())),
                event(1, EventValue::SharedText("negative".into())),
            ],
        );
        acc.add_patient(&p, &ontology, 1, &banned);

        let reservoir = acc.numeric_samples.find(Code(0)).unwrap();
        assert_eq!(reservoir.samples(), &[7.25]);
        assert_relative_eq!(reservoir.total_weight(), 0.25, epsilon = 1e-12);

        let texts = acc.text_counts.find(Code(1)).unwrap();
        assert_relative_eq!(texts["positive"], 0.5, epsilon = 1e-12);
        assert_relative_eq!(texts["negative"], 0.25, epsilon = 1e-12);
        assert!(acc.code_counts.find(Code(0)).is_none());
    }

    #[test]
    fn absorb_adds_weights_and_preserves_reservoir_totals() {
        let ontology = Ontology::from_edges(&[], 4);
        let banned = FlatMap::new();

        let mut left = DictionaryAccumulator::with_seed(1);
        let mut right = DictionaryAccumulator::with_seed(2);
        left.add_patient(
            &patient(
                0,
                vec![
                    event(0, EventValue::None),
                    event(1, EventValue::Numeric(1.0)),
                ],
            ),
            &ontology,
            2,
            &banned,
        );
        right.add_patient(
            &patient(
                1,
                vec![
                    event(0, EventValue::None),
                    event(1, EventValue::Numeric(3.0)),
                ],
            ),
            &ontology,
            2,
            &banned,
        );

        left.absorb(right);

        assert_relative_eq!(*left.code_counts.find(Code(0)).unwrap(), 0.5, epsilon = 1e-12);
        let reservoir = left.numeric_samples.find(Code(1)).unwrap();
        assert_eq!(reservoir.samples().len(), 2);
        assert_relative_eq!(reservoir.total_weight(), 0.5, epsilon = 1e-12);
    }
}
