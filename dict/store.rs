//! The patient store: ingested timelines, the code dictionary, and the
//! parallel fold-then-reduce driver.
//!
//! The driver is the only concurrency in the crate. Patients are partitioned
//! into shards, each shard folds into its own freshly built accumulator on a
//! rayon worker (no shared mutable state, no locks), and the shard results
//! are merged sequentially in shard order by the calling thread. Fixing the
//! seed and the shard count therefore fixes the merge tree and makes the run
//! reproducible bit-for-bit.

use crate::types::{Code, Patient};
use ahash::AHashMap;
use rayon::prelude::*;

/// Interns code strings to dense `Code` ids and resolves them back.
///
/// Dense ids are what make the accumulator's `FlatMap` containers viable:
/// the key space is exactly `0..len()`.
#[derive(Debug, Default)]
pub struct CodeDictionary {
    names: Vec<String>,
    index: AHashMap<String, Code>,
}

impl CodeDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, allocating the next dense id if unseen.
    pub fn intern(&mut self, name: &str) -> Code {
        if let Some(&code) = self.index.get(name) {
            return code;
        }
        let code = Code(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), code);
        code
    }

    pub fn get(&self, name: &str) -> Option<Code> {
        self.index.get(name).copied()
    }

    pub fn name(&self, code: Code) -> &str {
        &self.names[code.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All interned codes in id order, paired with their names.
    pub fn iter(&self) -> impl Iterator<Item = (Code, &str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (Code(i as u32), name.as_str()))
    }
}

/// The complete population view handed to the aggregation pipeline.
#[derive(Debug, Default)]
pub struct PatientStore {
    pub patients: Vec<Patient>,
    pub codes: CodeDictionary,
}

impl PatientStore {
    pub fn num_patients(&self) -> usize {
        self.patients.len()
    }
}

/// Partitions `patients` into at most `shards` contiguous chunks, folds each
/// chunk into its own accumulator on a rayon worker, then reduces the shard
/// accumulators sequentially in shard order.
///
/// `make(shard_index)` builds a fresh accumulator for one shard; it is where
/// per-shard random sources are seeded. `fold` must confine its side effects
/// to the given accumulator. `merge` is the sole synchronization boundary and
/// runs only on the calling thread, strictly after the workers have finished.
pub fn fold_patients_in_parallel<A, Make, Fold, Merge>(
    patients: &[Patient],
    shards: usize,
    make: Make,
    fold: Fold,
    merge: Merge,
) -> A
where
    A: Send,
    Make: Fn(usize) -> A + Sync,
    Fold: Fn(&mut A, &Patient) + Sync,
    Merge: Fn(&mut A, A),
{
    let shards = shards.max(1);
    if patients.is_empty() {
        return make(0);
    }
    let chunk_size = patients.len().div_ceil(shards);

    let mut shard_results: Vec<A> = patients
        .par_chunks(chunk_size)
        .enumerate()
        .map(|(shard_index, chunk)| {
            let mut accumulator = make(shard_index);
            for patient in chunk {
                fold(&mut accumulator, patient);
            }
            accumulator
        })
        .collect();

    let mut result = shard_results.remove(0);
    for shard in shard_results {
        merge(&mut result, shard);
    }
    result
}
