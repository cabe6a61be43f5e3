//! OMOP CDM v5.4 data model: table catalog, domain and lookup types,
//! lookback intervals, settings and the error taxonomy.

pub mod catalog;
pub mod cdm;
pub mod domain;
pub mod error;
pub mod interval;
pub mod lookup;
pub mod options;
pub mod source;

pub use catalog::{
    Catalog, ColumnDef, ForeignKey, SchemaNames, SchemaRole, SqlType, TableBuilder, TableDef,
};
pub use domain::OmopDomain;
pub use error::{EtlError, InputKind, Result, StepFailure};
pub use interval::Lookback;
pub use lookup::{
    ColumnRole, ConceptLookup, ConceptLookupStem, Conversion, DrugExposureType, QuantitySource,
    ShakEntry, ValueType, RECIPE_PREFIX,
};
pub use options::EtlSettings;
