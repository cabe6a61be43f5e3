use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EtlError;

/// OMOP domains a Stem row can be projected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OmopDomain {
    Condition,
    Drug,
    Procedure,
    Measurement,
    Observation,
    Device,
    Specimen,
}

impl OmopDomain {
    pub const ALL: [OmopDomain; 7] = [
        OmopDomain::Condition,
        OmopDomain::Drug,
        OmopDomain::Procedure,
        OmopDomain::Measurement,
        OmopDomain::Observation,
        OmopDomain::Device,
        OmopDomain::Specimen,
    ];

    /// The `domain_id` value stored on Stem rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            OmopDomain::Condition => "Condition",
            OmopDomain::Drug => "Drug",
            OmopDomain::Procedure => "Procedure",
            OmopDomain::Measurement => "Measurement",
            OmopDomain::Observation => "Observation",
            OmopDomain::Device => "Device",
            OmopDomain::Specimen => "Specimen",
        }
    }

    /// Name of the CDM table that receives rows of this domain.
    pub fn table_name(&self) -> &'static str {
        match self {
            OmopDomain::Condition => "condition_occurrence",
            OmopDomain::Drug => "drug_exposure",
            OmopDomain::Procedure => "procedure_occurrence",
            OmopDomain::Measurement => "measurement",
            OmopDomain::Observation => "observation",
            OmopDomain::Device => "device_exposure",
            OmopDomain::Specimen => "specimen",
        }
    }

    /// Filter used in `concept_lookup` to resolve categorical values of this domain.
    pub fn value_filter(&self) -> String {
        format!("{}_value", self.as_str().to_ascii_lowercase())
    }
}

impl fmt::Display for OmopDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OmopDomain {
    type Err = EtlError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        OmopDomain::ALL
            .into_iter()
            .find(|domain| domain.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| EtlError::UnknownDomain(s.to_string()))
    }
}
