// ========================================================================================
//                              Dictionary entry synthesis
// ========================================================================================
//
// The single-threaded final pass over the fully merged accumulator. It
// produces two ordered entry collections: `regular`, scored straight from
// the accumulated population fractions, and `ontology_rollup`, where each
// hierarchical code weight is first normalized against the cheapest direct
// parent so that weight already explained by a more general ancestor is
// discounted. Text and numeric entries have no ontology and appear unchanged
// in both collections.

use crate::accumulate::DictionaryAccumulator;
use crate::ontology::Ontology;
use crate::reservoir::ReservoirSampler;
use crate::types::Code;
use std::cmp::Ordering;
use thiserror::Error;

/// Bins per numeric code. Sorted samples are split into `NUM_BINS + 1`
/// near-equal groups to obtain `NUM_BINS` edges; the outermost bins are
/// opened to cover unobserved tails.
const NUM_BINS: usize = 10;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error(
        "accumulated weight {weight} for code {code} is outside (0, 1]; \
         an upstream invariant was violated"
    )]
    WeightOutOfRange { code: Code, weight: f64 },
}

/// The payload distinguishing the three entry kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    /// A bare code observation.
    Code,
    /// A recurring categorical text value.
    Text(String),
    /// A half-open numeric interval `[start, end)`. The first bin of a code
    /// starts at -inf and the last ends at +inf.
    Numeric { start: f32, end: f32 },
}

impl EntryValue {
    fn kind_rank(&self) -> u8 {
        match self {
            EntryValue::Code => 0,
            EntryValue::Text(_) => 1,
            EntryValue::Numeric { .. } => 2,
        }
    }
}

/// One scored dictionary entry. `weight` carries the entropy-style score, an
/// importance measure favoring rarer, more decisive observations.
#[derive(Debug, Clone, PartialEq)]
pub struct DictEntry {
    pub code: Code,
    pub value: EntryValue,
    pub weight: f64,
}

/// The finished artifact content, ready for encoding.
#[derive(Debug)]
pub struct Dictionary {
    pub regular: Vec<DictEntry>,
    pub ontology_rollup: Vec<DictEntry>,
    pub age_mean: f64,
    pub age_std: f64,
}

/// Consumes the merged accumulator and synthesizes both entry collections.
///
/// Deterministic: given the same accumulator contents, the output is
/// identical across runs. Fails (yielding no partial output) if any
/// accumulated weight falls outside `(0, 1]`.
pub fn synthesize(
    accumulator: DictionaryAccumulator,
    ontology: &Ontology,
) -> Result<Dictionary, SynthesisError> {
    let mut regular = Vec::new();
    let mut rollup = Vec::new();

    for (code, &weight) in accumulator.code_counts.iter() {
        regular.push(DictEntry {
            code,
            value: EntryValue::Code,
            weight: entropy_score(code, weight)?,
        });
    }

    for (code, &weight) in accumulator.hierarchical_code_counts.iter() {
        // The baseline is the weight already explained by the cheapest direct
        // parent; a code with no parents is measured against the whole
        // population. A parent with no observed weight would divide the
        // normalization by zero, so such codes are skipped outright.
        let mut baseline = 1.0f64;
        let mut observable = true;
        for &parent in ontology.get_parents(code) {
            match accumulator.hierarchical_code_counts.find(parent) {
                Some(&parent_weight) if parent_weight > 0.0 => {
                    baseline = baseline.min(parent_weight);
                }
                _ => {
                    observable = false;
                    break;
                }
            }
        }
        if !observable {
            continue;
        }

        let normalized = weight / baseline;
        rollup.push(DictEntry {
            code,
            value: EntryValue::Code,
            weight: baseline * entropy_score(code, normalized)?,
        });
    }

    for (code, texts) in accumulator.text_counts.iter() {
        for (text, &weight) in texts {
            let entry = DictEntry {
                code,
                value: EntryValue::Text(text.clone()),
                weight: entropy_score(code, weight)?,
            };
            regular.push(entry.clone());
            rollup.push(entry);
        }
    }

    for (code, reservoir) in accumulator.numeric_samples.iter() {
        for entry in bin_numeric_samples(code, reservoir)? {
            regular.push(entry.clone());
            rollup.push(entry);
        }
    }

    regular.sort_by(compare_entries);
    rollup.sort_by(compare_entries);

    Ok(Dictionary {
        regular,
        ontology_rollup: rollup,
        age_mean: accumulator.age_stats.mean(),
        age_std: accumulator.age_stats.stddev(),
    })
}

/// `w * ln(w) + (1 - w) * ln(1 - w)`, with the `x * ln(x) -> 0` convention at
/// the boundary.
///
/// Accumulated weights are population fractions, so `(0, 1]` is the legal
/// range: a concept observed in every single patient legitimately reaches
/// exactly 1. Anything else means an upstream accounting bug, and pushing it
/// through the logarithm would silently poison the artifact with NaNs.
fn entropy_score(code: Code, weight: f64) -> Result<f64, SynthesisError> {
    if !(weight > 0.0 && weight <= 1.0) {
        return Err(SynthesisError::WeightOutOfRange { code, weight });
    }
    Ok(x_ln_x(weight) + x_ln_x(1.0 - weight))
}

fn x_ln_x(x: f64) -> f64 {
    if x == 0.0 { 0.0 } else { x * x.ln() }
}

/// Splits a code's retained samples into at most `NUM_BINS` ordered,
/// non-empty, half-open bins.
///
/// Sorted samples are divided into `NUM_BINS + 1` near-equal groups; the
/// group boundaries become bin edges. Edges past the last sample clamp to it,
/// which collapses surplus bins when there are fewer distinct values than
/// bins; collapsed bins are dropped and their weight vanishes rather than
/// being redistributed. Every surviving bin gets an equal nominal share of
/// the code's total observed weight.
fn bin_numeric_samples(
    code: Code,
    reservoir: &ReservoirSampler,
) -> Result<Vec<DictEntry>, SynthesisError> {
    let mut samples = reservoir.samples().to_vec();
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    samples.sort_by(f32::total_cmp);

    let bin_weight = reservoir.total_weight() / NUM_BINS as f64;
    let score = entropy_score(code, bin_weight)?;
    let per_bin = (samples.len() + NUM_BINS) / (NUM_BINS + 1);
    let edge = |index: usize| samples[index.min(samples.len() - 1)];

    let mut entries = Vec::new();
    for bin in 0..NUM_BINS {
        let start = if bin == 0 {
            f32::NEG_INFINITY
        } else {
            edge(bin * per_bin)
        };
        let end = if bin == NUM_BINS - 1 {
            f32::INFINITY
        } else {
            edge((bin + 1) * per_bin)
        };
        if start == end {
            continue;
        }
        entries.push(DictEntry {
            code,
            value: EntryValue::Numeric { start, end },
            weight: score,
        });
    }
    Ok(entries)
}

/// Total order over (kind, code, subordinate key) for reproducible artifacts.
fn compare_entries(a: &DictEntry, b: &DictEntry) -> Ordering {
    a.value
        .kind_rank()
        .cmp(&b.value.kind_rank())
        .then(a.code.cmp(&b.code))
        .then_with(|| match (&a.value, &b.value) {
            (EntryValue::Text(left), EntryValue::Text(right)) => left.cmp(right),
            (
                EntryValue::Numeric { start: left, .. },
                EntryValue::Numeric { start: right, .. },
            ) => left.total_cmp(right),
            _ => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn empty_accumulator() -> DictionaryAccumulator {
        DictionaryAccumulator::with_seed(0)
    }

    fn score_of(w: f64) -> f64 {
        w * w.ln() + (1.0 - w) * (1.0 - w).ln()
    }

    #[test]
    fn leaf_weights_get_entropy_scores() {
        let mut acc = empty_accumulator();
        acc.code_counts.insert(Code(0), 0.25);
        let ontology = Ontology::from_edges(&[], 1);

        let dictionary = synthesize(acc, &ontology).unwrap();
        assert_eq!(dictionary.regular.len(), 1);
        assert_relative_eq!(dictionary.regular[0].weight, score_of(0.25), epsilon = 1e-12);
    }

    #[test]
    fn root_codes_are_normalized_against_the_whole_population() {
        let mut acc = empty_accumulator();
        acc.hierarchical_code_counts.insert(Code(0), 0.4);
        let ontology = Ontology::from_edges(&[], 1);

        let dictionary = synthesize(acc, &ontology).unwrap();
        // baseline = 1, so normalized == raw hierarchical weight.
        assert_relative_eq!(
            dictionary.ontology_rollup[0].weight,
            score_of(0.4),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rollup_scores_scale_by_the_cheapest_parent() {
        // C(2) -> B(1) -> A(0)
        let ontology = Ontology::from_edges(&[(Code(2), Code(1)), (Code(1), Code(0))], 3);
        let mut acc = empty_accumulator();
        acc.hierarchical_code_counts.insert(Code(0), 0.8);
        acc.hierarchical_code_counts.insert(Code(1), 0.5);
        acc.hierarchical_code_counts.insert(Code(2), 0.25);

        let dictionary = synthesize(acc, &ontology).unwrap();
        let entry_for = |code: Code| {
            dictionary
                .ontology_rollup
                .iter()
                .find(|e| e.code == code)
                .unwrap()
        };

        // baseline(C) = hierarchical(B) = 0.5, normalized = 0.5.
        assert_relative_eq!(
            entry_for(Code(2)).weight,
            0.5 * score_of(0.5),
            epsilon = 1e-12
        );
        // baseline(B) = hierarchical(A) = 0.8, normalized = 0.625.
        assert_relative_eq!(
            entry_for(Code(1)).weight,
            0.8 * score_of(0.625),
            epsilon = 1e-12
        );
    }

    #[test]
    fn a_saturated_weight_scores_zero_instead_of_nan() {
        let mut acc = empty_accumulator();
        acc.hierarchical_code_counts.insert(Code(0), 1.0);
        let ontology = Ontology::from_edges(&[], 1);

        let dictionary = synthesize(acc, &ontology).unwrap();
        assert_eq!(dictionary.ontology_rollup[0].weight, 0.0);
    }

    #[test]
    fn an_impossible_weight_is_a_terminating_error() {
        let mut acc = empty_accumulator();
        acc.code_counts.insert(Code(0), 1.5);
        let ontology = Ontology::from_edges(&[], 1);
        assert!(matches!(
            synthesize(acc, &ontology),
            Err(SynthesisError::WeightOutOfRange { .. })
        ));
    }

    #[test]
    fn codes_under_an_unobserved_parent_are_skipped() {
        let ontology = Ontology::from_edges(&[(Code(1), Code(0))], 2);
        let mut acc = empty_accumulator();
        // Code 1 observed, its parent never was: normalization is undefined.
        acc.hierarchical_code_counts.insert(Code(1), 0.3);

        let dictionary = synthesize(acc, &ontology).unwrap();
        assert!(dictionary.ontology_rollup.is_empty());
    }

    #[test]
    fn ascending_values_fill_ten_equal_bins() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reservoir = ReservoirSampler::new(200);
        for i in 0..110 {
            reservoir.add(i as f32, 0.001, &mut rng);
        }

        let entries = bin_numeric_samples(Code(0), &reservoir).unwrap();
        assert_eq!(entries.len(), 10);

        let bounds: Vec<(f32, f32)> = entries
            .iter()
            .map(|e| match e.value {
                EntryValue::Numeric { start, end } => (start, end),
                _ => panic!("expected numeric entry"),
            })
            .collect();
        assert_eq!(bounds[0].0, f32::NEG_INFINITY);
        assert_eq!(bounds[9].1, f32::INFINITY);
        // Interior edges land every 10th sample: 11 values per bin.
        assert_eq!(bounds[0].1, 10.0);
        assert_eq!(bounds[5].0, 50.0);
        for window in bounds.windows(2) {
            assert_eq!(window[0].1, window[1].0);
        }
    }

    #[test]
    fn few_distinct_values_collapse_into_fewer_bins() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut reservoir = ReservoirSampler::new(100);
        for value in [1.0f32, 2.0, 3.0] {
            reservoir.add(value, 0.01, &mut rng);
        }

        let entries = bin_numeric_samples(Code(0), &reservoir).unwrap();
        assert!(entries.len() <= 3);
        let last = entries.last().unwrap();
        match last.value {
            EntryValue::Numeric { end, .. } => assert_eq!(end, f32::INFINITY),
            _ => panic!("expected numeric entry"),
        }
    }

    #[test]
    fn entries_are_sorted_by_kind_code_then_subordinate_key() {
        let ontology = Ontology::from_edges(&[], 4);
        let mut acc = empty_accumulator();
        acc.code_counts.insert(Code(2), 0.125);
        acc.code_counts.insert(Code(1), 0.125);
        let mut texts = ahash::AHashMap::new();
        texts.insert("b".to_string(), 0.1);
        texts.insert("a".to_string(), 0.1);
        acc.text_counts.insert(Code(0), texts);

        let dictionary = synthesize(acc, &ontology).unwrap();
        let shape: Vec<(u8, u32)> = dictionary
            .regular
            .iter()
            .map(|e| (e.value.kind_rank(), e.code.0))
            .collect();
        assert_eq!(shape, vec![(0, 1), (0, 2), (1, 0), (1, 0)]);
        match (&dictionary.regular[2].value, &dictionary.regular[3].value) {
            (EntryValue::Text(first), EntryValue::Text(second)) => {
                assert!(first < second);
            }
            _ => panic!("expected text entries"),
        }
    }
}
