//! Merge statements run against PostgreSQL.
//!
//! Needs a scratch database named by `OMOP_TEST_DATABASE_URL`; passes
//! without running when it is unset. All work is rolled back.

use std::rc::Rc;

use omop_core::{PostgresSession, Row, Session};
use omop_merge::merge_sql;
use omop_model::{EtlSettings, SchemaNames, SchemaRole};
use omop_transform::TransformContext;
use omop_transform::schema::create_schemas_sql;

const SITES: [&str; 2] = ["t_merge_site_a", "t_merge_site_b"];

struct ScratchDatabase {
    session: PostgresSession,
}

impl ScratchDatabase {
    fn open() -> Option<Self> {
        let Ok(url) = std::env::var("OMOP_TEST_DATABASE_URL") else {
            eprintln!("OMOP_TEST_DATABASE_URL is not set, skipping");
            return None;
        };
        let client = postgres::Client::connect(&url, postgres::NoTls).unwrap();
        let mut session = PostgresSession::new(client);
        session.begin().unwrap();
        Some(Self { session })
    }

    fn run<S: AsRef<str>>(&mut self, statements: impl IntoIterator<Item = S>) {
        for statement in statements {
            self.session.execute(statement.as_ref()).unwrap();
        }
    }

    fn rows(&mut self, sql: &str) -> Vec<Row> {
        self.session.query(sql).unwrap()
    }
}

impl Drop for ScratchDatabase {
    fn drop(&mut self) {
        let _ = self.session.rollback();
    }
}

fn merge_context() -> Rc<TransformContext> {
    let mut settings =
        EtlSettings::default().with_merge_schemas(SITES.iter().map(|site| site.to_string()).collect());
    settings.schemas = SchemaNames {
        cdm: "t_merge_cdm".to_string(),
        lookups: "t_merge_lookups".to_string(),
        source: "t_merge_source".to_string(),
        vocab: "t_merge_vocab".to_string(),
        results: "t_merge_results".to_string(),
    };
    TransformContext::new(settings)
}

fn merge(db: &mut ScratchDatabase, ctx: &TransformContext, table: &str) {
    let table = ctx.catalog.cdm(table).unwrap();
    db.run(merge_sql(ctx, table, &ctx.settings.merge_schemas));
}

fn value<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).unwrap_or_else(|| panic!("{column} is NULL"))
}

#[test]
fn sites_sharing_a_person_merge_into_one_record() {
    let Some(mut db) = ScratchDatabase::open() else {
        return;
    };
    let ctx = merge_context();
    db.run(create_schemas_sql(&ctx));
    for site in SITES {
        db.run([format!("CREATE SCHEMA {site}")]);
        let tables: Vec<String> = ctx
            .catalog
            .tables(SchemaRole::Cdm)
            .map(|table| table.create_sql_in(site))
            .collect();
        db.run(tables);
    }
    let [site_a, site_b] = SITES;
    db.run([
        format!(
            "INSERT INTO {site_a}.person (person_id, gender_concept_id, year_of_birth, race_concept_id, \
             ethnicity_concept_id, person_source_value) VALUES (5, 8507, 1950, 0, 0, 'cpr_enc|X')"
        ),
        format!(
            "INSERT INTO {site_b}.person (person_id, gender_concept_id, year_of_birth, race_concept_id, \
             ethnicity_concept_id, person_source_value) VALUES \
             (8, 8507, 1950, 0, 0, 'cpr_enc|X'), (9, 8532, 1980, 0, 0, 'cpr_enc|Y')"
        ),
        format!(
            "INSERT INTO {site_b}.measurement (person_id, measurement_concept_id, measurement_date, \
             measurement_type_concept_id, value_as_number) VALUES (8, 3000963, DATE '2024-01-03', 32817, 6.2)"
        ),
        format!(
            "INSERT INTO {site_a}.drug_era (person_id, drug_concept_id, drug_era_start_date, drug_era_end_date, \
             drug_exposure_count) VALUES (5, 1125315, DATE '2024-01-01', DATE '2024-01-05', 1)"
        ),
        format!(
            "INSERT INTO {site_b}.drug_era (person_id, drug_concept_id, drug_era_start_date, drug_era_end_date, \
             drug_exposure_count) VALUES (8, 1125315, DATE '2024-01-04', DATE '2024-01-10', 2)"
        ),
    ]);

    merge(&mut db, &ctx, "person");
    merge(&mut db, &ctx, "measurement");
    merge(&mut db, &ctx, "drug_era");

    let cdm = ctx.cdm();
    let persons = db.rows(&format!(
        "SELECT person_id, person_source_value FROM {cdm}.person ORDER BY person_id"
    ));
    let persons: Vec<(&str, &str)> = persons
        .iter()
        .map(|row| (value(row, "person_id"), value(row, "person_source_value")))
        .collect();
    assert_eq!(persons, vec![("5", "cpr_enc|X"), ("9", "cpr_enc|Y")]);

    let measurements = db.rows(&format!("SELECT person_id FROM {cdm}.measurement"));
    assert_eq!(measurements.len(), 1);
    assert_eq!(value(&measurements[0], "person_id"), "5");

    let eras = db.rows(&format!(
        "SELECT person_id, drug_era_start_date, drug_era_end_date, drug_exposure_count FROM {cdm}.drug_era"
    ));
    assert_eq!(eras.len(), 1);
    assert_eq!(value(&eras[0], "person_id"), "5");
    assert_eq!(value(&eras[0], "drug_era_start_date"), "2024-01-01");
    assert_eq!(value(&eras[0], "drug_era_end_date"), "2024-01-10");
    assert_eq!(value(&eras[0], "drug_exposure_count"), "3");
}
