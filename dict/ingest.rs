//! Timeline ingestion: CSV event files in, a `PatientStore` out.
//!
//! The store format is a directory of CSV files (plain or gzip-compressed)
//! with columns `patient_id,start,end,code,value`; extra columns are
//! ignored. A row whose code is `birth` fixes the patient's birth date, and
//! every other row becomes one event whose age is the day count from birth
//! to the row's start date. Patients with no birth row cannot be aged and
//! are dropped with a warning.
//!
//! Value classification happens here, at the boundary: an empty value is a
//! bare code observation, a parseable number is numeric, and text is shared
//! or unique depending on whether the exact value recurs anywhere in the
//! store. Downstream code never sees an unclassified value.

use crate::store::{CodeDictionary, PatientStore};
use crate::types::{Code, Event, EventValue, Patient};
use ahash::AHashMap;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The marker code fixing a patient's birth date. Never interned as an
/// event code.
const BIRTH_CODE: &str = "birth";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("'{path}' is missing the required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("unparseable patient id '{value}' in '{path}'")]
    BadPatientId { path: PathBuf, value: String },
    #[error("unparseable date '{value}' in '{path}'")]
    BadDate { path: PathBuf, value: String },
}

/// Reads every timeline file under `root` and assembles the population view.
pub fn load_store(root: &Path) -> Result<PatientStore, IngestError> {
    let mut files = Vec::new();
    collect_timeline_files(root, &mut files)?;
    files.sort();
    info!("ingesting {} timeline file(s) from {}", files.len(), root.display());

    let mut codes = CodeDictionary::new();
    let mut builders: AHashMap<u32, PatientBuilder> = AHashMap::new();
    let mut text_occurrences: AHashMap<String, u32> = AHashMap::new();

    for path in &files {
        read_timeline_file(path, &mut codes, &mut builders, &mut text_occurrences)?;
    }

    let mut patients = Vec::with_capacity(builders.len());
    let mut skipped = 0usize;
    for (patient_id, builder) in builders {
        let Some(birth) = builder.birth else {
            warn!("could not find a birth event for patient {patient_id}; skipping");
            skipped += 1;
            continue;
        };
        let events = builder
            .rows
            .into_iter()
            .map(|row| Event {
                age: (row.start - birth).num_days() as f32,
                code: row.code,
                value: classify(row.value, &text_occurrences),
            })
            .collect();
        patients.push(Patient { patient_id, events });
    }
    // File iteration order must not leak into the artifact.
    patients.sort_by_key(|p| p.patient_id);

    info!(
        "ingested {} patients ({} skipped), {} distinct codes",
        patients.len(),
        skipped,
        codes.len()
    );
    Ok(PatientStore { patients, codes })
}

/// An unclassified value as it appears in the file.
#[derive(Debug)]
enum RawValue {
    None,
    Numeric(f32),
    Text(String),
}

#[derive(Debug)]
struct RawRow {
    start: NaiveDate,
    code: Code,
    value: RawValue,
}

#[derive(Debug, Default)]
struct PatientBuilder {
    birth: Option<NaiveDate>,
    rows: Vec<RawRow>,
}

fn classify(raw: RawValue, text_occurrences: &AHashMap<String, u32>) -> EventValue {
    match raw {
        RawValue::None => EventValue::None,
        RawValue::Numeric(v) => EventValue::Numeric(v),
        RawValue::Text(text) => {
            // A value recurring across the store is categorical vocabulary; a
            // singleton is free text.
            if text_occurrences.get(&text).copied().unwrap_or(0) > 1 {
                EventValue::SharedText(text)
            } else {
                EventValue::UniqueText(text)
            }
        }
    }
}

fn collect_timeline_files(root: &Path, files: &mut Vec<PathBuf>) -> Result<(), IngestError> {
    let io_err = |source| IngestError::Io {
        path: root.to_path_buf(),
        source,
    };
    if root.is_file() {
        files.push(root.to_path_buf());
        return Ok(());
    }
    for entry in std::fs::read_dir(root).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            collect_timeline_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn open_timeline_file(path: &Path) -> Result<Box<dyn Read>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn read_timeline_file(
    path: &Path,
    codes: &mut CodeDictionary,
    builders: &mut AHashMap<u32, PatientBuilder>,
    text_occurrences: &mut AHashMap<String, u32>,
) -> Result<(), IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(open_timeline_file(path)?);

    let csv_err = |source| IngestError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let headers = reader.headers().map_err(csv_err)?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(IngestError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
    };
    let patient_id_col = column("patient_id")?;
    let start_col = column("start")?;
    let code_col = column("code")?;
    let value_col = column("value")?;

    let mut rows = 0usize;
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        rows += 1;

        let id_field = record.get(patient_id_col).unwrap_or("");
        let patient_id: u32 =
            id_field
                .trim()
                .parse()
                .map_err(|_| IngestError::BadPatientId {
                    path: path.to_path_buf(),
                    value: id_field.to_string(),
                })?;

        let start = parse_date(record.get(start_col).unwrap_or("")).ok_or_else(|| {
            IngestError::BadDate {
                path: path.to_path_buf(),
                value: record.get(start_col).unwrap_or("").to_string(),
            }
        })?;

        let builder = builders.entry(patient_id).or_default();
        let code_name = record.get(code_col).unwrap_or("").trim();
        if code_name == BIRTH_CODE {
            builder.birth = Some(start);
            continue;
        }

        let value = parse_value(record.get(value_col).unwrap_or(""));
        if let RawValue::Text(text) = &value {
            *text_occurrences.entry(text.clone()).or_insert(0) += 1;
        }
        builder.rows.push(RawRow {
            start,
            code: codes.intern(code_name),
            value,
        });
    }
    debug!("read {rows} rows from {}", path.display());
    Ok(())
}

/// Parses the date portion of a timestamp, tolerating a trailing time
/// component after a space or a `T`.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split([' ', 'T']).next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn parse_value(raw: &str) -> RawValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return RawValue::None;
    }
    match lexical_core::parse::<f32>(trimmed.as_bytes()) {
        Ok(numeric) => RawValue::Numeric(numeric),
        Err(_) => RawValue::Text(trimmed.to_string()),
    }
}
