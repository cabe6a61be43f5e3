//! Reading the dictionary directory and writing it into `lookups.*`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use omop_core::sql::{insert_values, number_or_null, quote_literal, text_or_null};
use omop_core::{Session, Step, StepValue};
use omop_model::cdm::{self, ordinal};
use omop_model::{
    ConceptLookupStem, Conversion, DrugExposureType, EtlError, InputKind, Lookback, OmopDomain,
    SchemaNames, TableDef, ValueType,
};
use tracing::{debug, info};

use crate::error::LookupError;
use crate::parse::{concept_lookups, shak_entries, stem_mappings};
use crate::reader::read_rows;
use crate::set::LookupSet;

pub const CONCEPT_LOOKUP_FILE: &str = "concept_lookup.csv";
pub const CONCEPT_LOOKUP_STEM_FILE: &str = "concept_lookup_stem.csv";
pub const LOOKUPS_STEP: &str = "load_lookups";

const INSERT_BATCH: usize = 500;

fn existing(path: PathBuf) -> Result<Option<PathBuf>, LookupError> {
    match path.try_exists() {
        Ok(true) => Ok(Some(path)),
        Ok(false) => Ok(None),
        Err(source) => Err(LookupError::Io { path, source }),
    }
}

fn required(dir: &Path, name: &str) -> Result<PathBuf, LookupError> {
    existing(dir.join(name))?.ok_or_else(|| {
        EtlError::MissingRequiredInput {
            kind: InputKind::LookupFile,
            name: dir.join(name).display().to_string(),
        }
        .into()
    })
}

/// `shak_lookup.csv` (comma) wins over `shak_lookup.tsv` (tab).
fn shak_file(dir: &Path) -> Result<(PathBuf, u8), LookupError> {
    if let Some(path) = existing(dir.join("shak_lookup.csv"))? {
        return Ok((path, b','));
    }
    if let Some(path) = existing(dir.join("shak_lookup.tsv"))? {
        return Ok((path, b'\t'));
    }
    Err(EtlError::MissingRequiredInput {
        kind: InputKind::LookupFile,
        name: dir.join("shak_lookup.{csv,tsv}").display().to_string(),
    }
    .into())
}

/// Reads and validates the three dictionaries in `dir`.
pub fn read_dir(dir: &Path) -> Result<LookupSet, LookupError> {
    let concept_path = required(dir, CONCEPT_LOOKUP_FILE)?;
    let stem_path = required(dir, CONCEPT_LOOKUP_STEM_FILE)?;
    let (shak_path, shak_delimiter) = shak_file(dir)?;

    let concepts = concept_lookups(&read_rows(&concept_path, b';')?)
        .map_err(|source| LookupError::invalid(&concept_path, source))?;
    let stem = stem_mappings(&read_rows(&stem_path, b';')?)
        .map_err(|source| LookupError::invalid(&stem_path, source))?;
    let shak = shak_entries(&read_rows(&shak_path, shak_delimiter)?)
        .map_err(|source| LookupError::invalid(&shak_path, source))?;

    debug!(
        concepts = concepts.len(),
        stem = stem.len(),
        shak = shak.len(),
        dir = %dir.display(),
        "read lookup files"
    );
    Ok(LookupSet::new(concepts, stem, shak))
}

fn stem_values(row: &ConceptLookupStem) -> Vec<String> {
    let conversion = row.conversion.as_ref();
    vec![
        quote_literal(&row.datasource),
        text_or_null(row.source_variable.as_deref()),
        text_or_null(row.source_concept_code.as_deref()),
        text_or_null(row.value_type.as_ref().map(ValueType::as_str)),
        number_or_null(row.mapped_standard_code),
        text_or_null(row.std_code_domain.as_ref().map(OmopDomain::as_str)),
        number_or_null(row.type_concept_id),
        number_or_null(row.value_as_concept_id),
        number_or_null(conversion.and_then(Conversion::factor)),
        text_or_null(conversion.and_then(Conversion::recipe)),
        number_or_null(row.range_low),
        number_or_null(row.range_high),
        number_or_null(row.unit_concept_id),
        text_or_null(row.unit_source_value.as_deref()),
        text_or_null(row.drug_exposure_type.as_ref().map(DrugExposureType::as_str)),
        text_or_null(row.quantity_or_value_as_number.as_deref()),
        text_or_null(row.value_as_string.as_deref()),
        text_or_null(row.route_source_value.as_deref()),
        text_or_null(
            row.era_lookback_interval
                .as_ref()
                .map(Lookback::canonical)
                .as_deref(),
        ),
        text_or_null(row.start_date.as_deref()),
        text_or_null(row.end_date.as_deref()),
    ]
}

fn table_statements(table: &TableDef, schemas: &SchemaNames, rows: &[Vec<String>]) -> Vec<String> {
    let mut statements = vec![table.drop_sql(schemas), table.create_sql(schemas)];
    statements.extend(insert_values(
        &table.qualified(schemas),
        &table.insert_columns(),
        rows,
        INSERT_BATCH,
    ));
    statements
}

/// Drop, create and fill every lookup table. Same input, same statements.
pub fn load_tables_sql(set: &LookupSet, schemas: &SchemaNames) -> Vec<String> {
    let concept_rows: Vec<Vec<String>> = set
        .concepts
        .iter()
        .map(|lookup| {
            vec![
                quote_literal(&lookup.filter),
                quote_literal(&lookup.concept_string),
                lookup.concept_id.to_string(),
            ]
        })
        .collect();
    let stem_rows: Vec<Vec<String>> = set.stem.iter().map(stem_values).collect();
    let shak_rows: Vec<Vec<String>> = set
        .shak
        .iter()
        .map(|entry| {
            vec![
                quote_literal(&entry.shak_code),
                text_or_null(entry.name.as_deref()),
                text_or_null(entry.postal_code.as_deref()),
                text_or_null(entry.kind.as_deref()),
                text_or_null(entry.timezone.as_deref()),
            ]
        })
        .collect();

    let mut statements = vec![format!("CREATE SCHEMA IF NOT EXISTS {}", schemas.lookups)];
    statements.extend(table_statements(&cdm::concept_lookup_table(), schemas, &concept_rows));
    statements.extend(table_statements(&cdm::concept_lookup_stem_table(), schemas, &stem_rows));
    statements.extend(table_statements(&cdm::shak_lookup_table(), schemas, &shak_rows));
    statements
}

pub fn write_tables(session: &mut dyn Session, set: &LookupSet, schemas: &SchemaNames) -> Result<u64> {
    let mut written = 0;
    for statement in load_tables_sql(set, schemas) {
        written += session
            .execute(&statement)
            .context("write lookup tables")?;
    }
    Ok(written)
}

fn id_list(ids: &BTreeSet<i32>) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Concept ids rewritten to 0 by [`validate_concepts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptValidation {
    pub unknown: BTreeSet<i32>,
    pub non_standard: BTreeSet<i32>,
}

impl ConceptValidation {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty() && self.non_standard.is_empty()
    }
}

fn zero_if(value: &mut Option<i32>, rejected: &BTreeSet<i32>) {
    if value.is_some_and(|id| rejected.contains(&id)) {
        *value = Some(0);
    }
}

/// Checks every referenced concept against `<vocab>.concept`.
///
/// Unknown ids become 0 everywhere; `mapped_standard_code` also becomes 0
/// when the concept is not standard. Both the tables and `set` are updated.
pub fn validate_concepts(
    session: &mut dyn Session,
    set: &mut LookupSet,
    schemas: &SchemaNames,
) -> Result<ConceptValidation> {
    let referenced = set.referenced_concepts();
    if referenced.is_empty() {
        return Ok(ConceptValidation::default());
    }
    let rows = session
        .query(&format!(
            "SELECT concept_id, standard_concept FROM {}.concept WHERE concept_id IN ({})",
            schemas.vocab,
            id_list(&referenced)
        ))
        .context("look up referenced concepts")?;
    let known: BTreeMap<i32, bool> = rows
        .iter()
        .filter_map(|row| {
            let id = i32::try_from(row.get_i64("concept_id")?).ok()?;
            Some((id, row.get("standard_concept") == Some("S")))
        })
        .collect();

    let unknown: BTreeSet<i32> = referenced
        .iter()
        .copied()
        .filter(|id| !known.contains_key(id))
        .collect();
    let non_standard: BTreeSet<i32> = set
        .stem
        .iter()
        .filter_map(|row| row.mapped_standard_code)
        .filter(|id| known.get(id) == Some(&false))
        .collect();
    let report = ConceptValidation {
        unknown,
        non_standard,
    };
    if report.is_clean() {
        return Ok(report);
    }

    let concept_table = cdm::concept_lookup_table().qualified(schemas);
    let stem_table = cdm::concept_lookup_stem_table().qualified(schemas);
    let mut rejected_mapped = report.unknown.clone();
    rejected_mapped.extend(report.non_standard.iter().copied());

    let mut updates = Vec::new();
    if !report.unknown.is_empty() {
        let unknown = id_list(&report.unknown);
        updates.push(format!(
            "UPDATE {concept_table} SET concept_id = 0 WHERE concept_id IN ({unknown})"
        ));
        for column in ["type_concept_id", "value_as_concept_id", "unit_concept_id"] {
            updates.push(format!(
                "UPDATE {stem_table} SET {column} = 0 WHERE {column} IN ({unknown})"
            ));
        }
    }
    updates.push(format!(
        "UPDATE {stem_table} SET mapped_standard_code = 0 WHERE mapped_standard_code IN ({})",
        id_list(&rejected_mapped)
    ));
    for statement in updates {
        session
            .execute(&statement)
            .context("reset invalid concept ids")?;
    }

    for lookup in &mut set.concepts {
        if report.unknown.contains(&lookup.concept_id) {
            lookup.concept_id = 0;
        }
    }
    for row in &mut set.stem {
        zero_if(&mut row.mapped_standard_code, &rejected_mapped);
        zero_if(&mut row.type_concept_id, &report.unknown);
        zero_if(&mut row.value_as_concept_id, &report.unknown);
        zero_if(&mut row.unit_concept_id, &report.unknown);
    }
    debug!(
        unknown = report.unknown.len(),
        non_standard = report.non_standard.len(),
        "concept ids rewritten to 0"
    );
    Ok(report)
}

/// Every timezone in `shak_lookup` must be known to the database.
pub fn validate_timezones(session: &mut dyn Session, set: &LookupSet) -> Result<()> {
    let named = set.timezones();
    if named.is_empty() {
        return Ok(());
    }
    let list = named
        .iter()
        .map(|name| quote_literal(name))
        .collect::<Vec<_>>()
        .join(", ");
    let known: BTreeSet<String> = session
        .query(&format!(
            "SELECT name FROM pg_timezone_names WHERE name IN ({list})"
        ))
        .context("look up timezones")?
        .iter()
        .filter_map(|row| row.get("name").map(str::to_string))
        .collect();
    let missing: Vec<String> = named.difference(&known).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::UnknownTimezone(missing).into())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Check concept ids and timezones against the database.
    pub validate_in_database: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            validate_in_database: true,
        }
    }
}

/// Always-run step that writes `set` into the lookup schema and publishes
/// the validated dictionaries as its payload.
pub fn lookups_step(set: LookupSet, schemas: SchemaNames, options: LoadOptions) -> Step {
    Step::new(
        LOOKUPS_STEP,
        "Load lookup dictionaries",
        ordinal::ALWAYS,
        move |ctx| {
            let mut set = set.clone();
            let rows = write_tables(ctx.session, &set, &schemas)?;
            if options.validate_in_database {
                validate_timezones(ctx.session, &set)?;
                validate_concepts(ctx.session, &mut set, &schemas)?;
            }
            info!(
                rows,
                fingerprint = %set.fingerprint(),
                "lookup dictionaries loaded"
            );
            Ok(StepValue::rows(rows).with_payload(set))
        },
    )
}
