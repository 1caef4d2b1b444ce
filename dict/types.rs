// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only
// are used in one file.

use std::fmt;

/// An opaque identifier for a clinical concept (diagnosis, lab, medication, ...).
///
/// Codes are meaningful only via identity and ontology lookups. The newtype
/// prevents confusion with other integer spaces at compile time, and
/// `#[repr(transparent)]` guarantees it is a zero-cost abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Code(pub u32);

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payload attached to a clinical event.
///
/// The kind set is closed: classification into one of these four variants is
/// the ingestion boundary's responsibility, and every consumer matches
/// exhaustively, so an "invalid kind" branch cannot exist at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    /// A bare code observation with no attached value.
    None,
    /// A measured quantity, e.g. a lab result.
    Numeric(f32),
    /// A categorical text value that recurs across the store.
    SharedText(String),
    /// Free text observed exactly once; carries no vocabulary signal and is
    /// ignored by the aggregation pipeline.
    UniqueText(String),
}

/// One clinical observation, owned by exactly one patient.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Days since the patient's birth.
    pub age: f32,
    pub code: Code,
    pub value: EventValue,
}

/// One patient's ordered event timeline.
#[derive(Debug, Clone, Default)]
pub struct Patient {
    pub patient_id: u32,
    pub events: Vec<Event>,
}
