//! Semantic dictionary rows.
//!
//! `concept_lookup` maps small enumerations (gender codes, route strings)
//! to concepts. `concept_lookup_stem` describes how a source variable or
//! value becomes a Stem row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::OmopDomain;
use crate::interval::Lookback;

/// Prefix marking a named closed-form expression instead of a column or number.
pub const RECIPE_PREFIX: &str = "recipe__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Categorical,
    Numerical,
    FreeText,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Categorical => "categorical",
            ValueType::Numerical => "numerical",
            ValueType::FreeText => "free_text",
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "categorical" => Ok(ValueType::Categorical),
            "numerical" => Ok(ValueType::Numerical),
            "free_text" => Ok(ValueType::FreeText),
            other => Err(format!("unknown value_type {other:?}")),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a drug administration was given. Selects the interval shape and
/// the quantity recipe table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrugExposureType {
    Bolus,
    Continuous,
    Discrete,
}

impl DrugExposureType {
    pub const ALL: [DrugExposureType; 3] = [
        DrugExposureType::Bolus,
        DrugExposureType::Continuous,
        DrugExposureType::Discrete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DrugExposureType::Bolus => "bolus",
            DrugExposureType::Continuous => "continuous",
            DrugExposureType::Discrete => "discrete",
        }
    }

    /// Leading character of `from_file` for administrations of this type.
    pub fn file_prefix(&self) -> char {
        match self {
            DrugExposureType::Discrete => '3',
            DrugExposureType::Continuous => '8',
            DrugExposureType::Bolus => '9',
        }
    }
}

impl FromStr for DrugExposureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bolus" => Ok(DrugExposureType::Bolus),
            "continuous" => Ok(DrugExposureType::Continuous),
            "discrete" => Ok(DrugExposureType::Discrete),
            other => Err(format!("unknown drug_exposure_type {other:?}")),
        }
    }
}

impl fmt::Display for DrugExposureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multiplicative conversion: a plain factor or a named recipe token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Conversion {
    Factor(f64),
    Recipe(String),
}

impl Conversion {
    pub fn factor(&self) -> Option<f64> {
        match self {
            Conversion::Factor(value) => Some(*value),
            Conversion::Recipe(_) => None,
        }
    }

    pub fn recipe(&self) -> Option<&str> {
        match self {
            Conversion::Factor(_) => None,
            Conversion::Recipe(name) => Some(name),
        }
    }
}

impl FromStr for Conversion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.to_ascii_lowercase().starts_with(RECIPE_PREFIX) {
            return Ok(Conversion::Recipe(trimmed.to_ascii_lowercase()));
        }
        trimmed
            .replace(',', ".")
            .parse::<f64>()
            .map(Conversion::Factor)
            .map_err(|_| format!("invalid conversion {trimmed:?}"))
    }
}

/// Where a drug quantity comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuantitySource {
    Column(String),
    Recipe(String),
}

impl QuantitySource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.to_ascii_lowercase().starts_with(RECIPE_PREFIX) {
            QuantitySource::Recipe(trimmed.to_ascii_lowercase())
        } else {
            QuantitySource::Column(trimmed.to_string())
        }
    }
}

/// `(filter, concept_string) -> concept_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptLookup {
    pub filter: String,
    pub concept_string: String,
    pub concept_id: i32,
}

/// One semantic mapping row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptLookupStem {
    pub datasource: String,
    pub source_variable: Option<String>,
    pub source_concept_code: Option<String>,
    pub value_type: Option<ValueType>,
    pub mapped_standard_code: Option<i32>,
    pub std_code_domain: Option<OmopDomain>,
    pub type_concept_id: Option<i32>,
    pub value_as_concept_id: Option<i32>,
    pub conversion: Option<Conversion>,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
    pub unit_concept_id: Option<i32>,
    pub unit_source_value: Option<String>,
    pub drug_exposure_type: Option<DrugExposureType>,
    pub quantity_or_value_as_number: Option<String>,
    pub value_as_string: Option<String>,
    pub route_source_value: Option<String>,
    pub era_lookback_interval: Option<Lookback>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ConceptLookupStem {
    /// An empty mapping row for `datasource`; used as a starting point by loaders and tests.
    pub fn new(datasource: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            source_variable: None,
            source_concept_code: None,
            value_type: None,
            mapped_standard_code: None,
            std_code_domain: None,
            type_concept_id: None,
            value_as_concept_id: None,
            conversion: None,
            range_low: None,
            range_high: None,
            unit_concept_id: None,
            unit_source_value: None,
            drug_exposure_type: None,
            quantity_or_value_as_number: None,
            value_as_string: None,
            route_source_value: None,
            era_lookback_interval: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn is_drug(&self) -> bool {
        self.drug_exposure_type.is_some()
    }

    /// True when the row carries enough to match a source row: a
    /// `source_concept_code`, or a `source_variable` together with a value
    /// type (drug rows use their exposure type instead).
    pub fn is_identified(&self) -> bool {
        let has_code = self.source_concept_code.is_some();
        let has_variable = self.source_variable.is_some()
            && (self.value_type.is_some() || self.drug_exposure_type.is_some());
        has_code || has_variable
    }

    /// Numerical and free-text rows match on their variable, so a
    /// `source_concept_code` on them names a second, competing identity.
    pub fn has_conflicting_identity(&self) -> bool {
        self.source_concept_code.is_some()
            && matches!(self.value_type, Some(ValueType::Numerical | ValueType::FreeText))
    }

    pub fn quantity_source(&self) -> Option<QuantitySource> {
        self.quantity_or_value_as_number
            .as_deref()
            .map(QuantitySource::parse)
    }
}

/// Column roles resolved per source table from the mapping rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnRole {
    StartDate,
    EndDate,
    ValueAsNumber,
    ValueAsString,
    RouteSourceValue,
}

impl ColumnRole {
    pub const ALL: [ColumnRole; 5] = [
        ColumnRole::StartDate,
        ColumnRole::EndDate,
        ColumnRole::ValueAsNumber,
        ColumnRole::ValueAsString,
        ColumnRole::RouteSourceValue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnRole::StartDate => "start_date",
            ColumnRole::EndDate => "end_date",
            ColumnRole::ValueAsNumber => "value_as_number",
            ColumnRole::ValueAsString => "value_as_string",
            ColumnRole::RouteSourceValue => "route_source_value",
        }
    }

    /// The column name this mapping row assigns to the role, if any.
    /// Recipe tokens are not column names.
    pub fn column_of<'a>(&self, row: &'a ConceptLookupStem) -> Option<&'a str> {
        let value = match self {
            ColumnRole::StartDate => row.start_date.as_deref(),
            ColumnRole::EndDate => row.end_date.as_deref(),
            ColumnRole::ValueAsNumber => row.quantity_or_value_as_number.as_deref(),
            ColumnRole::ValueAsString => row.value_as_string.as_deref(),
            ColumnRole::RouteSourceValue => row.route_source_value.as_deref(),
        };
        value.filter(|name| !name.to_ascii_lowercase().starts_with(RECIPE_PREFIX))
    }
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hospital/department code entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShakEntry {
    pub shak_code: String,
    pub name: Option<String>,
    pub postal_code: Option<String>,
    pub kind: Option<String>,
    pub timezone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_distinguishes_recipes_from_factors() {
        assert_eq!("0.001".parse::<Conversion>().unwrap(), Conversion::Factor(0.001));
        assert_eq!("1,5".parse::<Conversion>().unwrap(), Conversion::Factor(1.5));
        assert_eq!(
            "Recipe__G_to_mg".parse::<Conversion>().unwrap(),
            Conversion::Recipe("recipe__g_to_mg".to_string())
        );
        assert!("mg".parse::<Conversion>().is_err());
    }

    #[test]
    fn recipe_tokens_are_not_columns() {
        let mut row = ConceptLookupStem::new("administrations");
        row.quantity_or_value_as_number = Some("recipe__solumdr".to_string());
        assert_eq!(ColumnRole::ValueAsNumber.column_of(&row), None);
        row.quantity_or_value_as_number = Some("value".to_string());
        assert_eq!(ColumnRole::ValueAsNumber.column_of(&row), Some("value"));
    }

    #[test]
    fn identification_rules() {
        let mut row = ConceptLookupStem::new("laboratory");
        assert!(!row.is_identified());
        row.source_variable = Some("hgb".to_string());
        assert!(!row.is_identified());
        row.value_type = Some(ValueType::Numerical);
        assert!(row.is_identified());

        let mut coded = ConceptLookupStem::new("observations");
        coded.source_concept_code = Some("smoker__yes".to_string());
        assert!(coded.is_identified());
        coded.source_variable = Some("smoker".to_string());
        coded.value_type = Some(ValueType::Categorical);
        assert!(!coded.has_conflicting_identity());

        row.source_concept_code = Some("hgb__high".to_string());
        assert!(row.has_conflicting_identity());
    }
}
