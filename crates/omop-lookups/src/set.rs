//! The in-memory dictionaries of one run.

use std::collections::{BTreeMap, BTreeSet};

use omop_model::{
    ColumnRole, ConceptLookup, ConceptLookupStem, Conversion, DrugExposureType, EtlError,
    QuantitySource, ShakEntry,
};
use serde::Serialize;

use crate::hash::sha256_hex;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LookupSet {
    pub concepts: Vec<ConceptLookup>,
    pub stem: Vec<ConceptLookupStem>,
    pub shak: Vec<ShakEntry>,
}

impl LookupSet {
    pub fn new(
        concepts: Vec<ConceptLookup>,
        stem: Vec<ConceptLookupStem>,
        shak: Vec<ShakEntry>,
    ) -> Self {
        Self {
            concepts,
            stem,
            shak,
        }
    }

    /// `concept_string -> concept_id` for one `concept_lookup` filter.
    pub fn concept_map(&self, filter: &str) -> BTreeMap<String, i32> {
        self.concepts
            .iter()
            .filter(|lookup| lookup.filter == filter)
            .map(|lookup| (lookup.concept_string.clone(), lookup.concept_id))
            .collect()
    }

    pub fn stem_rows<'a>(&'a self, datasource: &'a str) -> impl Iterator<Item = &'a ConceptLookupStem> {
        self.stem
            .iter()
            .filter(move |row| row.datasource == datasource)
    }

    pub fn drug_rows(&self) -> impl Iterator<Item = &ConceptLookupStem> {
        self.stem.iter().filter(|row| row.is_drug())
    }

    pub fn datasources(&self) -> BTreeSet<&str> {
        self.stem.iter().map(|row| row.datasource.as_str()).collect()
    }

    /// The single column assigned to `role` by the rows of `datasource`.
    ///
    /// More than one distinct column is an [`EtlError::AmbiguousMapping`].
    pub fn resolve_column(&self, datasource: &str, role: ColumnRole) -> Result<Option<String>, EtlError> {
        let candidates: BTreeSet<&str> = self
            .stem_rows(datasource)
            .filter_map(|row| role.column_of(row))
            .collect();
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.into_iter().next().map(str::to_string)),
            _ => Err(EtlError::AmbiguousMapping {
                datasource: datasource.to_string(),
                role: role.as_str().to_string(),
                candidates: candidates.into_iter().map(str::to_string).collect(),
            }),
        }
    }

    /// Distinct quantity sources per exposure type, in a stable order.
    pub fn quantity_sources(&self, exposure: DrugExposureType) -> BTreeSet<QuantitySource> {
        self.drug_rows()
            .filter(|row| row.drug_exposure_type == Some(exposure))
            .filter_map(ConceptLookupStem::quantity_source)
            .collect()
    }

    /// Distinct conversion recipe tokens used by drug rows.
    pub fn conversion_recipes(&self) -> BTreeSet<String> {
        self.drug_rows()
            .filter_map(|row| row.conversion.as_ref().and_then(Conversion::recipe))
            .map(str::to_string)
            .collect()
    }

    /// Timezones named by `shak_lookup`.
    pub fn timezones(&self) -> BTreeSet<String> {
        self.shak
            .iter()
            .filter_map(|entry| entry.timezone.clone())
            .collect()
    }

    /// Every non-zero concept id the dictionaries reference.
    pub fn referenced_concepts(&self) -> BTreeSet<i32> {
        let mut ids: BTreeSet<i32> = self.concepts.iter().map(|c| c.concept_id).collect();
        for row in &self.stem {
            ids.extend(
                [
                    row.mapped_standard_code,
                    row.type_concept_id,
                    row.value_as_concept_id,
                    row.unit_concept_id,
                ]
                .into_iter()
                .flatten(),
            );
        }
        ids.remove(&0);
        ids
    }

    /// SHA-256 over the canonical JSON form; equal inputs give equal fingerprints.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        sha256_hex(&canonical)
    }

    pub fn len(&self) -> usize {
        self.concepts.len() + self.stem.len() + self.shak.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use omop_model::ValueType;

    use super::*;

    fn lab(variable: &str, start: &str) -> ConceptLookupStem {
        let mut row = ConceptLookupStem::new("laboratory");
        row.source_variable = Some(variable.to_string());
        row.value_type = Some(ValueType::Numerical);
        row.start_date = Some(start.to_string());
        row
    }

    #[test]
    fn resolves_single_column_per_role() {
        let set = LookupSet::new(vec![], vec![lab("hgb", "timestamp"), lab("crp", "timestamp")], vec![]);
        assert_eq!(
            set.resolve_column("laboratory", ColumnRole::StartDate).unwrap().as_deref(),
            Some("timestamp")
        );
        assert_eq!(set.resolve_column("laboratory", ColumnRole::EndDate).unwrap(), None);
    }

    #[test]
    fn conflicting_columns_are_ambiguous() {
        let set = LookupSet::new(vec![], vec![lab("hgb", "timestamp"), lab("crp", "drawn_at")], vec![]);
        let err = set
            .resolve_column("laboratory", ColumnRole::StartDate)
            .unwrap_err();
        match err {
            EtlError::AmbiguousMapping { candidates, .. } => {
                assert_eq!(candidates, vec!["drawn_at", "timestamp"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = LookupSet::new(vec![], vec![lab("hgb", "timestamp")], vec![]);
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        let c = LookupSet::new(vec![], vec![lab("crp", "timestamp")], vec![]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
