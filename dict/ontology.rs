//! The concept hierarchy over codes.
//!
//! An edge `child -> parent` means "parent is a more general concept than
//! child". The accumulation workers query ancestors from many threads at
//! once, so the full ancestor closure is precomputed at construction and
//! every query afterwards is a pure slice lookup on `&self`.
//!
//! Contract: `get_all_parents` is INCLUSIVE of the queried code itself; that
//! is what makes hierarchical weights rollup-inclusive. `get_parents` returns
//! direct parents only. Leaf weights are kept in a separate map by the
//! accumulator, so the inclusive convention never double-counts.

use crate::store::CodeDictionary;
use crate::types::Code;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("IO error reading ontology: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ontology row: {0}")]
    Csv(#[from] csv::Error),
    #[error("ontology row {row} needs exactly two columns (child,parent)")]
    BadRow { row: usize },
}

#[derive(Debug, Default)]
pub struct Ontology {
    /// Direct parents, indexed by raw code id.
    parents: Vec<Vec<Code>>,
    /// Inclusive ancestor closure, indexed by raw code id.
    all_parents: Vec<Vec<Code>>,
}

impl Ontology {
    /// Builds an ontology from explicit `(child, parent)` edges.
    ///
    /// Codes outside any edge are valid: they are their own sole inclusive
    /// ancestor and have no direct parents.
    pub fn from_edges(edges: &[(Code, Code)], num_codes: usize) -> Self {
        let highest = edges
            .iter()
            .flat_map(|&(c, p)| [c.0 as usize, p.0 as usize])
            .max()
            .map_or(0, |m| m + 1);
        let len = num_codes.max(highest);

        let mut parents = vec![Vec::new(); len];
        for &(child, parent) in edges {
            if !parents[child.0 as usize].contains(&parent) {
                parents[child.0 as usize].push(parent);
            }
        }

        let mut all_parents = vec![Vec::new(); len];
        for id in 0..len {
            all_parents[id] = ancestor_closure(Code(id as u32), &parents);
        }

        Self {
            parents,
            all_parents,
        }
    }

    /// Reads a two-column headerless CSV of `child,parent` code names,
    /// interning unseen names into the shared code dictionary.
    pub fn from_csv(
        path: &Path,
        codes: &mut CodeDictionary,
    ) -> Result<Self, OntologyError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), codes)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        codes: &mut CodeDictionary,
    ) -> Result<Self, OntologyError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut edges = Vec::new();
        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            if record.len() != 2 {
                return Err(OntologyError::BadRow { row });
            }
            let child = codes.intern(record[0].trim());
            let parent = codes.intern(record[1].trim());
            edges.push((child, parent));
        }
        Ok(Self::from_edges(&edges, codes.len()))
    }

    /// All ancestors of `code`, INCLUSIVE of `code` itself.
    pub fn get_all_parents(&self, code: Code) -> &[Code] {
        self.all_parents
            .get(code.0 as usize)
            .map_or(&[], Vec::as_slice)
    }

    /// Direct parents of `code` only.
    pub fn get_parents(&self, code: Code) -> &[Code] {
        self.parents.get(code.0 as usize).map_or(&[], Vec::as_slice)
    }
}

/// Breadth-first walk up the parent edges, deduplicated, self first.
fn ancestor_closure(code: Code, parents: &[Vec<Code>]) -> Vec<Code> {
    let mut closure = vec![code];
    let mut cursor = 0;
    while cursor < closure.len() {
        let current = closure[cursor];
        cursor += 1;
        if let Some(direct) = parents.get(current.0 as usize) {
            for &parent in direct {
                if !closure.contains(&parent) {
                    closure.push(parent);
                }
            }
        }
    }
    closure
}
