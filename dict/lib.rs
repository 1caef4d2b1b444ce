#![deny(dead_code)]
#![deny(unused_imports)]
pub mod accumulate;
pub mod artifact;
pub mod flatmap;
pub mod ingest;
pub mod ontology;
pub mod reservoir;
pub mod stats;
pub mod store;
pub mod synthesis;
pub mod types;
