#![allow(dead_code)]

use std::rc::Rc;

use omop_core::{PostgresSession, Row, Session};
use omop_lookups::{LookupSet, read_dir};
use omop_model::{
    ConceptLookupStem, DrugExposureType, EtlSettings, OmopDomain, SchemaNames, SchemaRole, ValueType,
};
use omop_transform::TransformContext;
use omop_transform::schema::create_schemas_sql;

/// The sample dictionaries shipped in the workspace `lookups/` directory.
pub fn sample_lookups() -> LookupSet {
    read_dir(&EtlSettings::default().lookup_dir).unwrap()
}

pub fn context(settings: EtlSettings) -> Rc<TransformContext> {
    TransformContext::new(settings)
}

pub fn default_context() -> Rc<TransformContext> {
    context(EtlSettings::default())
}

pub fn lab_row(variable: &str, start: &str) -> ConceptLookupStem {
    let mut row = ConceptLookupStem::new("laboratory");
    row.source_variable = Some(variable.to_string());
    row.value_type = Some(ValueType::Numerical);
    row.mapped_standard_code = Some(3_000_963);
    row.std_code_domain = Some(OmopDomain::Measurement);
    row.quantity_or_value_as_number = Some("value".to_string());
    row.start_date = Some(start.to_string());
    row
}

pub fn drug_row(name: &str, exposure: DrugExposureType, quantity: &str) -> ConceptLookupStem {
    let mut row = ConceptLookupStem::new("administrations");
    row.source_variable = Some(name.to_string());
    row.mapped_standard_code = Some(1_321_341);
    row.std_code_domain = Some(OmopDomain::Drug);
    row.drug_exposure_type = Some(exposure);
    row.quantity_or_value_as_number = Some(quantity.to_string());
    row.end_date = Some("timestamp".to_string());
    row
}

/// Names the PostgreSQL database the database tests run against.
pub const DATABASE_URL_VAR: &str = "OMOP_TEST_DATABASE_URL";

/// A session held inside one transaction that is rolled back on drop.
pub struct ScratchDatabase {
    pub session: PostgresSession,
}

impl ScratchDatabase {
    /// `None` when no test database is configured.
    pub fn open() -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_URL_VAR) else {
            eprintln!("{DATABASE_URL_VAR} is not set, skipping");
            return None;
        };
        let client = postgres::Client::connect(&url, postgres::NoTls).unwrap();
        let mut session = PostgresSession::new(client);
        session.begin().unwrap();
        Some(Self { session })
    }

    pub fn run<S: AsRef<str>>(&mut self, statements: impl IntoIterator<Item = S>) {
        for statement in statements {
            self.session.execute(statement.as_ref()).unwrap();
        }
    }

    pub fn execute(&mut self, sql: &str) -> u64 {
        self.session.execute(sql).unwrap()
    }

    pub fn rows(&mut self, sql: &str) -> Vec<Row> {
        self.session.query(sql).unwrap()
    }

    /// Schemas and tables of `ctx`: the CDM tables, the site source tables
    /// and the vocabulary tables the ETL reads.
    pub fn create_tables(&mut self, ctx: &TransformContext) {
        self.run(create_schemas_sql(ctx));
        let schemas = ctx.schemas();
        self.run([
            format!("CREATE SCHEMA {}", schemas.source),
            format!("CREATE SCHEMA {}", schemas.vocab),
        ]);
        let source: Vec<String> = ctx
            .catalog
            .tables(SchemaRole::Source)
            .map(|table| table.create_sql(schemas))
            .collect();
        self.run(source);
        let vocab = &schemas.vocab;
        self.run([
            format!(
                "CREATE TABLE {vocab}.concept (concept_id integer PRIMARY KEY, concept_name varchar(255), \
                 vocabulary_id varchar(20), concept_class_id varchar(20), concept_code varchar(50))"
            ),
            format!(
                "CREATE TABLE {vocab}.concept_relationship (concept_id_1 integer, concept_id_2 integer, \
                 relationship_id varchar(20))"
            ),
            format!(
                "CREATE TABLE {vocab}.concept_ancestor (ancestor_concept_id integer, \
                 descendant_concept_id integer, min_levels_of_separation integer)"
            ),
        ]);
    }
}

impl Drop for ScratchDatabase {
    fn drop(&mut self) {
        let _ = self.session.rollback();
    }
}

/// Default settings with every schema name prefixed, so tests running
/// side by side do not touch each other's tables.
pub fn scratch_context(prefix: &str) -> Rc<TransformContext> {
    let mut settings = EtlSettings::default();
    settings.schemas = SchemaNames {
        cdm: format!("{prefix}_cdm"),
        lookups: format!("{prefix}_lookups"),
        source: format!("{prefix}_source"),
        vocab: format!("{prefix}_vocab"),
        results: format!("{prefix}_results"),
    };
    context(settings)
}
