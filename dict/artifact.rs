//! Artifact encoding: the finished dictionary as self-describing MessagePack.
//!
//! Field names are preserved (`rmp_serde` "named" mode) so the artifact can
//! be decoded by any MessagePack reader without this crate's type
//! definitions. Top-level shape:
//! `{ regular: [entry], ontology_rollup: [entry], age_stats: {mean, std} }`,
//! where each entry carries a `kind` discriminator, the code id, the
//! kind-specific payload, and the scalar weight.

use crate::synthesis::{DictEntry, Dictionary, EntryValue};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error writing artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("MessagePack encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

#[derive(Serialize)]
struct ArtifactRoot<'a> {
    regular: Vec<EntryRecord<'a>>,
    ontology_rollup: Vec<EntryRecord<'a>>,
    age_stats: AgeStats,
}

#[derive(Serialize)]
struct AgeStats {
    mean: f64,
    std: f64,
}

/// The wire shape of one entry. Internally tagged so every entry is a single
/// map with a `kind` field next to its payload.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EntryRecord<'a> {
    Code {
        code: u32,
        weight: f64,
    },
    Text {
        code: u32,
        text_value: &'a str,
        weight: f64,
    },
    Numeric {
        code: u32,
        val_start: f32,
        val_end: f32,
        weight: f64,
    },
}

impl<'a> From<&'a DictEntry> for EntryRecord<'a> {
    fn from(entry: &'a DictEntry) -> Self {
        let code = entry.code.0;
        let weight = entry.weight;
        match &entry.value {
            EntryValue::Code => EntryRecord::Code { code, weight },
            EntryValue::Text(text) => EntryRecord::Text {
                code,
                text_value: text,
                weight,
            },
            EntryValue::Numeric { start, end } => EntryRecord::Numeric {
                code,
                val_start: *start,
                val_end: *end,
                weight,
            },
        }
    }
}

/// Encodes the dictionary to MessagePack bytes.
pub fn encode(dictionary: &Dictionary) -> Result<Vec<u8>, ArtifactError> {
    let root = ArtifactRoot {
        regular: dictionary.regular.iter().map(EntryRecord::from).collect(),
        ontology_rollup: dictionary
            .ontology_rollup
            .iter()
            .map(EntryRecord::from)
            .collect(),
        age_stats: AgeStats {
            mean: dictionary.age_mean,
            std: dictionary.age_std,
        },
    };
    Ok(rmp_serde::encode::to_vec_named(&root)?)
}

/// Encodes the dictionary and writes it to `path` in one operation; no
/// partial artifact is left behind on encoding failure.
pub fn write_to_path(dictionary: &Dictionary, path: &Path) -> Result<(), ArtifactError> {
    let bytes = encode(dictionary)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
