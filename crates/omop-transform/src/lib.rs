//! The per-site OMOP ETL: reference tables, the Stem mapping, domain
//! projections, eras and the observation-period envelope.

pub mod context;
pub mod era;
pub mod observation_period;
pub mod projections;
pub mod projector;
pub mod schema;
pub mod stem;
pub mod steps;

pub use context::{PERSON_SOURCE_PREFIX, TransformContext, VISIT_SOURCE_PREFIX};
pub use era::{EraLookback, EraTarget, IntervalUnion};
pub use projector::Projection;
pub use steps::{etl_pipeline, step_catalog};
