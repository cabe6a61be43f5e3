//! Named closed-form expressions for drug quantities and unit conversions.
//!
//! Administrations are aliased `a`, prescriptions `p`. Only the recipes
//! listed here are recognised; anything else yields `None`.

use omop_core::sql::{Cond, Expr};
use omop_model::DrugExposureType;

fn col(name: &str) -> Expr {
    Expr::column(name)
}

fn unit_is(unit: &str) -> Cond {
    Cond::eq(col("lower(p.epaspresdrugunit)"), Expr::text(unit))
}

/// Concentration of a noradrenalin syringe.
fn noradrenalin_concentration() -> Expr {
    Expr::case(
        vec![
            (
                Cond::eq(col("p.epaspresdose"), Expr::int(0)),
                Expr::number(0.6)
                    .mul(col("p.epaspresweight"))
                    .div(Expr::int(1000)),
            ),
            (
                Cond::eq(col("p.epaspresmixamount"), Expr::int(0)),
                col("p.epaspresdose").div(Expr::int(100)),
            ),
        ],
        col("p.epaspresdose").div(col("p.epaspresmixamount")),
    )
}

fn value_or_fallback() -> Expr {
    Expr::coalesce(vec![col("a.value0"), col("a.value")])
}

/// Quantity expression of `recipe` for administrations of `exposure`.
pub fn quantity_recipe(exposure: DrugExposureType, recipe: &str) -> Option<Expr> {
    use DrugExposureType::{Bolus, Continuous};

    let expr = match (exposure, recipe) {
        (Bolus | Continuous, "recipe__noradrenalinsad") => Expr::coalesce(vec![
            col("a.value0"),
            col("a.value").mul(noradrenalin_concentration()),
        ]),
        (Bolus | Continuous, "recipe__solumdr") => value_or_fallback(),
        (Continuous, "recipe__metaoxedrinsad") => col("a.value").mul(Expr::coalesce(vec![
            col("a.value").div(col("a.value1")),
            col("p.epaspresconc"),
        ])),
        (Continuous, "recipe__vancomycin1g") => {
            let dose = Expr::case(
                vec![(Cond::eq(col("p.epaspresdose"), Expr::int(0)), Expr::int(1000))],
                col("p.epaspresdose"),
            );
            let volume = Expr::case(
                vec![(Cond::eq(col("p.epaspresmixamount"), Expr::int(0)), Expr::int(100))],
                col("p.epaspresmixamount"),
            );
            col("a.value").mul(dose).div(volume)
        }
        (Continuous, "recipe__privigeniv") => col("a.value").mul(Expr::int(100)),
        _ => return None,
    };
    Some(expr)
}

/// Multiplicative unit conversion of `recipe` for administrations of `exposure`.
pub fn conversion_recipe(exposure: DrugExposureType, recipe: &str) -> Option<Expr> {
    let expr = match recipe {
        "recipe__noradrenalinsad" => {
            Expr::case(vec![(unit_is("ug"), Expr::number(0.001))], Expr::int(1))
        }
        "recipe__g_to_mg" => Expr::case(vec![(unit_is("g"), Expr::int(1000))], Expr::int(1)),
        "recipe__vancomycin1g" if exposure == DrugExposureType::Discrete => Expr::case(
            vec![(
                Cond::And(vec![
                    unit_is("g"),
                    Cond::eq(col("p.epaspresdose"), Expr::int(0)),
                ]),
                Expr::int(1000),
            )],
            Expr::int(1),
        ),
        "recipe__vancomycin1g" => Expr::int(1),
        "recipe__metaoxedrinsad" => Expr::case(
            vec![
                (unit_is("ug"), Expr::number(0.001)),
                (unit_is("ml"), col("p.epaspresconc")),
            ],
            Expr::int(1),
        ),
        "recipe__corotropsnf" => Expr::number(0.001),
        "recipe__kaliumkloridps" | "recipe__kaliumkloridsad" => Expr::int(75),
        "recipe__minirinfrr" => Expr::int(1000),
        "recipe__novorapidiu" | "recipe__desmopressintv" => Expr::int(1),
        _ => return None,
    };
    Some(expr)
}
