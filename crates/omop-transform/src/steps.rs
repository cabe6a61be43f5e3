//! Assembly of the per-site ETL pipeline.

use std::rc::Rc;

use omop_core::{EtlPipeline, summary_step};
use omop_lookups::{LoadOptions, LookupSet, lookups_step};

use crate::context::TransformContext;
use crate::era::{condition_era_step, drug_era_step};
use crate::observation_period::observation_period_step;
use crate::projections::{
    care_site_step, death_step, location_step, person_step, visit_occurrence_step,
};
use crate::projector::projection_steps;
use crate::schema::{cdm_source_step, create_schemas_step};
use crate::stem::stem_step;

/// Every step of a site run in execution order.
///
/// `lookups` has already been read from disk; the lookup step writes and
/// validates it inside the run's transaction.
pub fn etl_pipeline(ctx: &Rc<TransformContext>, lookups: LookupSet, options: LoadOptions) -> EtlPipeline {
    let mut pipeline = EtlPipeline::new()
        .add_step(create_schemas_step(Rc::clone(ctx)))
        .add_step(lookups_step(lookups, ctx.schemas().clone(), options))
        .add_step(cdm_source_step(Rc::clone(ctx)))
        .add_step(location_step(Rc::clone(ctx)))
        .add_step(care_site_step(Rc::clone(ctx)))
        .add_step(person_step(Rc::clone(ctx)))
        .add_step(death_step(Rc::clone(ctx)))
        .add_step(visit_occurrence_step(Rc::clone(ctx)))
        .add_step(stem_step(Rc::clone(ctx)));
    for step in projection_steps(ctx) {
        pipeline.push(step);
    }
    pipeline
        .add_step(observation_period_step(Rc::clone(ctx)))
        .add_step(drug_era_step(Rc::clone(ctx)))
        .add_step(condition_era_step(Rc::clone(ctx)))
        .add_step(summary_step(ctx.catalog.clone(), ctx.schemas().clone()))
}

/// `(key, ordinal, description)` of every step, for listings.
pub fn step_catalog(ctx: &Rc<TransformContext>) -> Vec<(String, i32, String)> {
    etl_pipeline(ctx, LookupSet::default(), LoadOptions::default())
        .steps()
        .iter()
        .map(|step| {
            (
                step.key().to_string(),
                step.ordinal(),
                step.description().to_string(),
            )
        })
        .collect()
}
