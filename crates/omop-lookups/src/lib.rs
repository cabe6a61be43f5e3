//! Lookup dictionaries: the small CSV files that drive Stem mapping.
//!
//! Files are read and validated on the host before any database work;
//! [`lookups_step`] then writes them into the lookup schema, checks
//! concept ids and timezones against the database and publishes the
//! validated [`LookupSet`] for later steps.

pub mod error;
mod hash;
pub mod load;
pub mod parse;
pub mod reader;
pub mod set;

pub use error::LookupError;
pub use load::{
    CONCEPT_LOOKUP_FILE, CONCEPT_LOOKUP_STEM_FILE, ConceptValidation, LOOKUPS_STEP, LoadOptions,
    load_tables_sql, lookups_step, read_dir, validate_concepts, validate_timezones, write_tables,
};
pub use set::LookupSet;
