//! Pipeline settings read from the environment.
//!
//! [`EtlSettings::from_lookup`] takes any `name -> value` function so tests
//! can supply variables without touching the process environment.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::SchemaNames;
use crate::error::{EtlError, Result};
use crate::interval::Lookback;

pub const ETL_RUN_STEP: &str = "ETL_RUN_STEP";
pub const INCLUDE_UNMAPPED_CODES: &str = "INCLUDE_UNMAPPED_CODES";
pub const STEM_TRANSFORMS: &str = "STEM_TRANSFORMS";
pub const HOSPITAL_SHAK_CODE: &str = "HOSPITAL_SHAK_CODE";
pub const DEPARTMENT_SHAK_CODE: &str = "DEPARTMENT_SHAK_CODE";
pub const PERSON_FROM_REGISTRY: &str = "PERSON_FROM_REGISTRY";
pub const SOURCE_SCHEMA: &str = "SOURCE_SCHEMA";
pub const VOCAB_SCHEMA: &str = "VOCAB_SCHEMA";
pub const RESULTS_SCHEMA: &str = "RESULTS_SCHEMA";
pub const OMOP_LOOKUP_DIR: &str = "OMOP_LOOKUP_DIR";
pub const MERGE_SCHEMAS: &str = "MERGE_SCHEMAS";
pub const CONDITION_ERA_LOOKBACK: &str = "CONDITION_ERA_LOOKBACK";
pub const CDM_SOURCE_NAME: &str = "CDM_SOURCE_NAME";

/// Settings of one ETL or merge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlSettings {
    /// Steps with an ordinal below this value are skipped (resume point).
    pub etl_run_step: i32,
    pub include_unmapped_codes: bool,
    /// Stem sub-loaders to run; `None` runs all of them.
    pub stem_transforms: Option<BTreeSet<String>>,
    pub hospital_shak_code: Option<String>,
    pub department_shak_code: Option<String>,
    /// Hash `cpr_enc` alone into `person_id` instead of salting it with the department.
    pub person_from_registry: bool,
    pub schemas: SchemaNames,
    pub lookup_dir: PathBuf,
    pub merge_schemas: Vec<String>,
    pub condition_era_lookback: Lookback,
    pub cdm_source_name: Option<String>,
}

impl Default for EtlSettings {
    fn default() -> Self {
        Self {
            etl_run_step: 0,
            include_unmapped_codes: true,
            stem_transforms: None,
            hospital_shak_code: None,
            department_shak_code: None,
            person_from_registry: false,
            schemas: SchemaNames::default(),
            lookup_dir: default_lookup_dir(),
            merge_schemas: Vec::new(),
            condition_era_lookback: Lookback::ZERO,
            cdm_source_name: None,
        }
    }
}

fn default_lookup_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("lookups")
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRUE" | "1" | "YES" => Ok(true),
        "FALSE" | "0" | "NO" => Ok(false),
        _ => Err(EtlError::invalid_setting(name, raw)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl EtlSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`. Unset or blank variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut settings = Self::default();

        if let Some(raw) = get(ETL_RUN_STEP) {
            settings.etl_run_step = raw
                .trim()
                .parse()
                .map_err(|_| EtlError::invalid_setting(ETL_RUN_STEP, &raw))?;
        }
        if let Some(raw) = get(INCLUDE_UNMAPPED_CODES) {
            settings.include_unmapped_codes = parse_bool(INCLUDE_UNMAPPED_CODES, &raw)?;
        }
        if let Some(raw) = get(PERSON_FROM_REGISTRY) {
            settings.person_from_registry = parse_bool(PERSON_FROM_REGISTRY, &raw)?;
        }
        if let Some(raw) = get(STEM_TRANSFORMS) {
            let names: BTreeSet<String> = split_list(&raw)
                .into_iter()
                .map(|name| name.to_ascii_lowercase())
                .collect();
            if !names.is_empty() {
                settings.stem_transforms = Some(names);
            }
        }
        settings.hospital_shak_code = get(HOSPITAL_SHAK_CODE).map(|v| v.trim().to_string());
        settings.department_shak_code = get(DEPARTMENT_SHAK_CODE).map(|v| v.trim().to_string());
        if let Some(raw) = get(SOURCE_SCHEMA) {
            settings.schemas.source = raw.trim().to_string();
        }
        if let Some(raw) = get(VOCAB_SCHEMA) {
            settings.schemas.vocab = raw.trim().to_string();
        }
        if let Some(raw) = get(RESULTS_SCHEMA) {
            settings.schemas.results = raw.trim().to_string();
        }
        if let Some(raw) = get(OMOP_LOOKUP_DIR) {
            settings.lookup_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get(MERGE_SCHEMAS) {
            settings.merge_schemas = split_list(&raw);
        }
        if let Some(raw) = get(CONDITION_ERA_LOOKBACK) {
            settings.condition_era_lookback = raw
                .parse()
                .map_err(|_| EtlError::invalid_setting(CONDITION_ERA_LOOKBACK, &raw))?;
        }
        settings.cdm_source_name = get(CDM_SOURCE_NAME).map(|v| v.trim().to_string());
        Ok(settings)
    }

    pub fn with_run_step(mut self, step: i32) -> Self {
        self.etl_run_step = step;
        self
    }

    pub fn with_unmapped_codes(mut self, include: bool) -> Self {
        self.include_unmapped_codes = include;
        self
    }

    pub fn with_lookup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lookup_dir = dir.into();
        self
    }

    pub fn with_merge_schemas(mut self, schemas: Vec<String>) -> Self {
        self.merge_schemas = schemas;
        self
    }

    /// Whether a step with `ordinal` runs under the current resume point.
    pub fn runs_ordinal(&self, ordinal: i32) -> bool {
        ordinal == -1 || ordinal >= self.etl_run_step
    }

    /// Whether the Stem sub-loader `name` is enabled.
    pub fn stem_transform_enabled(&self, name: &str) -> bool {
        self.stem_transforms
            .as_ref()
            .is_none_or(|names| names.contains(&name.to_ascii_lowercase()))
    }

    /// `cdm_source.cdm_source_name`.
    pub fn source_name(&self) -> String {
        if let Some(name) = &self.cdm_source_name {
            return name.clone();
        }
        format!(
            "{}/{}",
            self.hospital_shak_code.as_deref().unwrap_or(""),
            self.department_shak_code.as_deref().unwrap_or("")
        )
    }
}
