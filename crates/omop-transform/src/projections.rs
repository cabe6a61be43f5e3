//! INSERT…SELECT builders for the reference tables: location, care site,
//! person, death and visit occurrence.

use std::rc::Rc;

use omop_core::sql::{case_lookup, quote_literal};
use omop_core::{Step, StepValue};
use omop_lookups::LookupSet;
use omop_model::cdm::ordinal;
use omop_model::source;
use tracing::info;

use crate::context::{TransformContext, lookups};

/// Builds the statement of a single-INSERT step.
pub type InsertBuilder = fn(&TransformContext, &LookupSet) -> String;

/// A step that checks its source tables and runs one generated INSERT.
pub(crate) fn insert_step(
    ctx: Rc<TransformContext>,
    key: &'static str,
    description: &'static str,
    step_ordinal: i32,
    sources: &'static [&'static str],
    build: InsertBuilder,
) -> Step {
    Step::new(key, description, step_ordinal, move |step| {
        for table in sources {
            ctx.require_source(step, table)?;
        }
        let lookups = lookups(step)?;
        let rows = step.session.execute(&build(&ctx, &lookups))?;
        info!(table = key, rows, "rows inserted");
        Ok(StepValue::rows(rows))
    })
}

/// Danish country concept.
const DENMARK: i32 = 4_330_442;
const DEATH_TYPE_REGISTRY: i32 = 32_879;
const VISIT_INTENSIVE_CARE: i32 = 32_037;
const TYPE_EHR: i32 = 32_817;
/// `c_status` of a deceased person in the civil registry.
const STATUS_DECEASED: &str = "90";

/// SHAK codes that get a location and a care site: every department with
/// a course plus the configured hospital and department.
fn site_filter(ctx: &TransformContext) -> String {
    let configured: Vec<String> = [
        ctx.settings.hospital_shak_code.as_deref(),
        ctx.settings.department_shak_code.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(quote_literal)
    .collect();
    let mut filter = format!(
        "s.shak_code IN (SELECT DISTINCT dept_shak FROM {}.{} WHERE dept_shak IS NOT NULL)",
        ctx.source(),
        source::COURSE_METADATA
    );
    if !configured.is_empty() {
        filter.push_str(&format!(" OR s.shak_code IN ({})", configured.join(", ")));
    }
    filter
}

pub fn location_sql(ctx: &TransformContext, _lookups: &LookupSet) -> String {
    format!(
        "INSERT INTO {cdm}.location (zip, location_source_value, country_concept_id, country_source_value)
         SELECT DISTINCT s.postal_code, {source_value}, {DENMARK}, 'DK'
         FROM {lookups}.shak_lookup s
         WHERE {filter}",
        cdm = ctx.cdm(),
        lookups = ctx.lookups(),
        source_value = ctx.site_source_sql("s.shak_code"),
        filter = site_filter(ctx),
    )
}

pub fn care_site_sql(ctx: &TransformContext, lookups: &LookupSet) -> String {
    let place_of_service = case_lookup(
        "lower(s.type)",
        &lookups.concept_map("care_site_type"),
        Some(0),
    );
    format!(
        "INSERT INTO {cdm}.care_site (care_site_name, place_of_service_concept_id, location_id,
             care_site_source_value, place_of_service_source_value)
         SELECT DISTINCT ON (s.shak_code) s.name, {place_of_service}, l.location_id,
             {source_value}, s.type
         FROM {lookups}.shak_lookup s
         LEFT JOIN {cdm}.location l ON l.location_source_value = {source_value}
         WHERE {filter}
         ORDER BY s.shak_code, l.location_id",
        cdm = ctx.cdm(),
        lookups = ctx.lookups(),
        source_value = ctx.site_source_sql("s.shak_code"),
        filter = site_filter(ctx),
    )
}

pub fn person_sql(ctx: &TransformContext, lookups: &LookupSet) -> String {
    let gender = case_lookup("lower(p.c_kon)", &lookups.concept_map("gender"), Some(0));
    let care_site = match &ctx.settings.department_shak_code {
        Some(department) => format!(
            "(SELECT min(cs.care_site_id) FROM {}.care_site cs WHERE cs.care_site_source_value = {})",
            ctx.cdm(),
            ctx.site_source_sql(&quote_literal(department))
        ),
        None => "NULL".to_string(),
    };
    format!(
        "INSERT INTO {cdm}.person (person_id, gender_concept_id, year_of_birth, month_of_birth,
             day_of_birth, birth_datetime, race_concept_id, ethnicity_concept_id, care_site_id,
             person_source_value, gender_source_value)
         SELECT DISTINCT ON (p.cpr_enc) {person_id}, {gender},
             extract(year FROM p.d_foddato)::integer,
             extract(month FROM p.d_foddato)::integer,
             extract(day FROM p.d_foddato)::integer,
             p.d_foddato::timestamp, 0, 0, {care_site},
             {person_source}, p.c_kon
         FROM {source}.{table} p
         WHERE p.cpr_enc IS NOT NULL AND p.d_foddato IS NOT NULL
         ORDER BY p.cpr_enc, p.d_foddato",
        cdm = ctx.cdm(),
        source = ctx.source(),
        table = source::PERSON,
        person_id = ctx.person_id_sql("p.cpr_enc"),
        person_source = ctx.person_source_sql("p.cpr_enc"),
    )
}

pub fn death_sql(ctx: &TransformContext, _lookups: &LookupSet) -> String {
    format!(
        "INSERT INTO {cdm}.death (person_id, death_date, death_datetime, death_type_concept_id)
         SELECT DISTINCT ON (per.person_id) per.person_id, p.d_status_hen_start,
             p.d_status_hen_start::timestamp, {DEATH_TYPE_REGISTRY}
         FROM {source}.{table} p
         JOIN {cdm}.person per ON per.person_source_value = {person_source}
         WHERE p.c_status = {deceased} AND p.d_status_hen_start IS NOT NULL
         ORDER BY per.person_id, p.d_status_hen_start",
        cdm = ctx.cdm(),
        source = ctx.source(),
        table = source::PERSON,
        person_source = ctx.person_source_sql("p.cpr_enc"),
        deceased = quote_literal(STATUS_DECEASED),
    )
}

/// One visit per course, owned by the person found through the course's `cpr_enc`.
pub fn visit_occurrence_sql(ctx: &TransformContext, _lookups: &LookupSet) -> String {
    format!(
        "INSERT INTO {cdm}.visit_occurrence (person_id, visit_concept_id, visit_start_date,
             visit_start_datetime, visit_end_date, visit_end_datetime, visit_type_concept_id,
             care_site_id, visit_source_value)
         SELECT DISTINCT ON (cm.courseid) per.person_id, {VISIT_INTENSIVE_CARE},
             cm.admdatetime::date, cm.admdatetime,
             coalesce(cm.dischargedatetime, cm.admdatetime)::date,
             coalesce(cm.dischargedatetime, cm.admdatetime),
             {TYPE_EHR}, cs.care_site_id, {visit_source}
         FROM {source}.{courses} cm
         JOIN {source}.{mapping} m ON m.courseid = cm.courseid
         JOIN {cdm}.person per ON per.person_source_value = {person_source}
         LEFT JOIN {cdm}.care_site cs ON cs.care_site_source_value = {site_source}
         WHERE cm.admdatetime IS NOT NULL
         ORDER BY cm.courseid, cm.admdatetime",
        cdm = ctx.cdm(),
        source = ctx.source(),
        courses = source::COURSE_METADATA,
        mapping = source::COURSE_ID_CPR_MAPPING,
        person_source = ctx.person_source_sql("m.cpr_enc"),
        visit_source = ctx.visit_source_sql("cm.courseid"),
        site_source = ctx.site_source_sql("cm.dept_shak"),
    )
}

pub fn location_step(ctx: Rc<TransformContext>) -> Step {
    insert_step(
        ctx,
        "location",
        "Locations of hospitals and departments",
        ordinal::LOCATION,
        &[],
        location_sql,
    )
}

pub fn care_site_step(ctx: Rc<TransformContext>) -> Step {
    insert_step(
        ctx,
        "care_site",
        "Care sites of hospitals and departments",
        ordinal::CARE_SITE,
        &[],
        care_site_sql,
    )
}

pub fn person_step(ctx: Rc<TransformContext>) -> Step {
    insert_step(
        ctx,
        "person",
        "Persons from the civil registry extract",
        ordinal::PERSON,
        &[source::PERSON],
        person_sql,
    )
}

pub fn death_step(ctx: Rc<TransformContext>) -> Step {
    insert_step(
        ctx,
        "death",
        "Deaths from the civil registry status",
        ordinal::DEATH,
        &[source::PERSON],
        death_sql,
    )
}

pub fn visit_occurrence_step(ctx: Rc<TransformContext>) -> Step {
    insert_step(
        ctx,
        "visit_occurrence",
        "Visits from course metadata",
        ordinal::VISIT_OCCURRENCE,
        &[source::COURSE_METADATA, source::COURSE_ID_CPR_MAPPING],
        visit_occurrence_sql,
    )
}
