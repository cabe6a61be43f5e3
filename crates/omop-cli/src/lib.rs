//! Components of the `omop-etl` binary.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod progress;
pub mod summary;
