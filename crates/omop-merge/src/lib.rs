//! Multi-site merge: unions per-site CDM schemas into one, remapping
//! surrogate keys and re-collapsing eras across sites.

pub mod remap;
pub mod steps;
pub mod tables;

pub use remap::{Remap, SiteSelect};
pub use steps::{merge_pipeline, merge_step_catalog, merged_tables};
pub use tables::{MergeKind, merge_sql};
