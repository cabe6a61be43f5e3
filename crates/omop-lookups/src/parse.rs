//! Host-side parsing and validation of dictionary rows.
//!
//! Anything the pipeline cannot interpret is fatal here: an unknown
//! domain, value type or exposure type, a malformed lookback interval, or
//! a mapping row that identifies no source rows.

use std::collections::BTreeSet;
use std::str::FromStr;

use omop_model::{
    ConceptLookup, ConceptLookupStem, Conversion, DrugExposureType, EtlError, Lookback,
    OmopDomain, ShakEntry, ValueType,
};
use tracing::warn;

use crate::reader::CsvRow;

fn invalid(row: &CsvRow, message: String) -> EtlError {
    EtlError::InvalidMappingRow {
        line: row.line,
        message,
    }
}

fn parse_with<T, E>(row: &CsvRow, key: &str) -> Result<Option<T>, EtlError>
where
    T: FromStr<Err = E>,
    E: std::fmt::Display,
{
    row.get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|err| invalid(row, format!("{key}: {err}")))
        })
        .transpose()
}

fn parse_int(row: &CsvRow, key: &str) -> Result<Option<i32>, EtlError> {
    row.get(key)
        .map(|raw| {
            raw.parse::<i32>()
                .map_err(|_| invalid(row, format!("{key}: {raw:?} is not an integer")))
        })
        .transpose()
}

fn parse_decimal(row: &CsvRow, key: &str) -> Result<Option<f64>, EtlError> {
    row.get(key)
        .map(|raw| {
            raw.replace(',', ".")
                .parse::<f64>()
                .map_err(|_| invalid(row, format!("{key}: {raw:?} is not a number")))
        })
        .transpose()
}

/// `filter;concept_string;concept_id`, case-folded. Duplicate keys keep the first row.
pub fn concept_lookups(rows: &[CsvRow]) -> Result<Vec<ConceptLookup>, EtlError> {
    let mut seen = BTreeSet::new();
    let mut lookups = Vec::with_capacity(rows.len());
    for row in rows {
        let filter = row
            .get_lower("filter")
            .ok_or_else(|| invalid(row, "filter is empty".to_string()))?;
        let concept_string = row
            .get_lower("concept_string")
            .ok_or_else(|| invalid(row, "concept_string is empty".to_string()))?;
        let concept_id = parse_int(row, "concept_id")?
            .ok_or_else(|| invalid(row, "concept_id is empty".to_string()))?;
        if !seen.insert((filter.clone(), concept_string.clone())) {
            warn!(
                line = row.line,
                filter = %filter,
                "duplicate concept_lookup key; keeping the first row"
            );
            continue;
        }
        lookups.push(ConceptLookup {
            filter,
            concept_string,
            concept_id,
        });
    }
    Ok(lookups)
}

/// One `concept_lookup_stem` row.
pub fn stem_mapping(row: &CsvRow) -> Result<ConceptLookupStem, EtlError> {
    let datasource = row
        .get_lower("datasource")
        .ok_or_else(|| invalid(row, "datasource is empty".to_string()))?;
    let mut mapping = ConceptLookupStem::new(datasource);
    mapping.source_variable = row.get_lower("source_variable");
    mapping.source_concept_code = row.get_lower("source_concept_code");
    mapping.value_type = parse_with::<ValueType, _>(row, "value_type")?;
    mapping.mapped_standard_code = parse_int(row, "mapped_standard_code")?;
    mapping.std_code_domain = row
        .get("std_code_domain")
        .map(str::parse::<OmopDomain>)
        .transpose()?;
    mapping.type_concept_id = parse_int(row, "type_concept_id")?;
    mapping.value_as_concept_id = parse_int(row, "value_as_concept_id")?;
    mapping.conversion = parse_with::<Conversion, _>(row, "conversion")?;
    mapping.range_low = parse_decimal(row, "range_low")?;
    mapping.range_high = parse_decimal(row, "range_high")?;
    mapping.unit_concept_id = parse_int(row, "unit_concept_id")?;
    mapping.unit_source_value = row.get("unit_source_value").map(str::to_string);
    mapping.drug_exposure_type = parse_with::<DrugExposureType, _>(row, "drug_exposure_type")?;
    mapping.quantity_or_value_as_number = row.get_lower("quantity_or_value_as_number");
    mapping.value_as_string = row.get_lower("value_as_string");
    mapping.route_source_value = row.get_lower("route_source_value");
    mapping.era_lookback_interval = row
        .get("era_lookback_interval")
        .map(str::parse::<Lookback>)
        .transpose()?;
    mapping.start_date = row.get_lower("start_date");
    mapping.end_date = row.get_lower("end_date");

    if !mapping.is_identified() {
        return Err(invalid(
            row,
            "row has neither source_concept_code nor source_variable with a value or exposure type"
                .to_string(),
        ));
    }
    if mapping.has_conflicting_identity() {
        return Err(invalid(
            row,
            "numerical and free_text rows match on source_variable and must not set source_concept_code"
                .to_string(),
        ));
    }
    Ok(mapping)
}

pub fn stem_mappings(rows: &[CsvRow]) -> Result<Vec<ConceptLookupStem>, EtlError> {
    rows.iter().map(stem_mapping).collect()
}

/// `shak_code, name, postal_code, type, timezone`.
pub fn shak_entries(rows: &[CsvRow]) -> Result<Vec<ShakEntry>, EtlError> {
    rows.iter()
        .map(|row| {
            let shak_code = row
                .get("shak_code")
                .ok_or_else(|| invalid(row, "shak_code is empty".to_string()))?;
            Ok(ShakEntry {
                shak_code: shak_code.to_string(),
                name: row.get("name").map(str::to_string),
                postal_code: row.get("postal_code").map(str::to_string),
                kind: row.get("type").map(str::to_string),
                timezone: row.get("timezone").map(str::to_string),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(line: usize, pairs: &[(&str, &str)]) -> CsvRow {
        CsvRow {
            line,
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn stem_row_is_typed_and_normalised() {
        let mapping = stem_mapping(&row(
            2,
            &[
                ("datasource", "Laboratory"),
                ("source_variable", "HGB"),
                ("value_type", "numerical"),
                ("mapped_standard_code", "3000963"),
                ("std_code_domain", "measurement"),
                ("conversion", "0,6206"),
                ("era_lookback_interval", "3 hours"),
                ("start_date", "Timestamp"),
            ],
        ))
        .unwrap();
        assert_eq!(mapping.datasource, "laboratory");
        assert_eq!(mapping.source_variable.as_deref(), Some("hgb"));
        assert_eq!(mapping.std_code_domain, Some(OmopDomain::Measurement));
        assert_eq!(mapping.conversion, Some(Conversion::Factor(0.6206)));
        assert_eq!(mapping.era_lookback_interval, Some(Lookback::from_seconds(10_800)));
        assert_eq!(mapping.start_date.as_deref(), Some("timestamp"));
    }

    #[test]
    fn unknown_domain_is_fatal() {
        let err = stem_mapping(&row(
            3,
            &[
                ("datasource", "observations"),
                ("source_concept_code", "x__y"),
                ("std_code_domain", "Episode"),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, EtlError::UnknownDomain(_)));
    }

    #[test]
    fn malformed_lookback_is_fatal() {
        let err = stem_mapping(&row(
            4,
            &[
                ("datasource", "administrations"),
                ("source_variable", "heparin"),
                ("drug_exposure_type", "bolus"),
                ("era_lookback_interval", "abc"),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, EtlError::InvalidEraLookbackInterval(_)));
    }

    #[test]
    fn unidentified_rows_are_rejected() {
        let err = stem_mapping(&row(
            5,
            &[("datasource", "laboratory"), ("source_variable", "hgb")],
        ))
        .unwrap_err();
        assert!(matches!(err, EtlError::InvalidMappingRow { line: 5, .. }));
    }

    #[test]
    fn duplicate_concept_keys_keep_first() {
        let rows = vec![
            row(2, &[("filter", "gender"), ("concept_string", "M"), ("concept_id", "8507")]),
            row(3, &[("filter", "gender"), ("concept_string", "m"), ("concept_id", "1")]),
        ];
        let lookups = concept_lookups(&rows).unwrap();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].concept_id, 8507);
        assert_eq!(lookups[0].concept_string, "m");
    }
}
