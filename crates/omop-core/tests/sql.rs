//! Tests for SQL cleaning and expression rendering.

use std::collections::BTreeMap;

use omop_core::sql::{Cond, Expr, case_lookup, clean_sql};
use proptest::prelude::*;

#[test]
fn collapses_layout_whitespace() {
    let sql = "
        INSERT INTO omopcdm.person (
            person_id ,
            gender_concept_id
        )
        SELECT   p.id,\t8507
        FROM source.person  p ;
    ";
    insta::assert_snapshot!(
        clean_sql(sql),
        @"INSERT INTO omopcdm.person (person_id, gender_concept_id) SELECT p.id, 8507 FROM source.person p;"
    );
}

#[test]
fn keeps_quoted_text_verbatim() {
    insta::assert_snapshot!(
        clean_sql("SELECT 'a  b' ,  \"Odd  Name\"  FROM t"),
        @r#"SELECT 'a  b', "Odd  Name" FROM t"#
    );
    insta::assert_snapshot!(
        clean_sql("SELECT 'it''s   here'"),
        @"SELECT 'it''s   here'"
    );
}

#[test]
fn renders_nested_expressions() {
    let expr = Expr::coalesce(vec![
        Expr::column("a.value0"),
        Expr::column("a.value").mul(Expr::case(
            vec![(
                Cond::eq(Expr::column("p.epaspresdose"), Expr::int(0)),
                Expr::number(0.6)
                    .mul(Expr::column("p.epaspresweight"))
                    .div(Expr::int(1000)),
            )],
            Expr::column("p.epaspresdose").div(Expr::column("p.epaspresmixamount")),
        )),
    ]);
    insta::assert_snapshot!(
        expr.render(),
        @"coalesce(a.value0, (a.value * CASE WHEN p.epaspresdose = 0 THEN ((0.6 * p.epaspresweight) / nullif(1000, 0)) ELSE (p.epaspresdose / nullif(p.epaspresmixamount, 0)) END))"
    );
}

#[test]
fn case_lookup_uses_sorted_keys() {
    let mut map = BTreeMap::new();
    map.insert("m".to_string(), 8507);
    map.insert("k".to_string(), 8532);
    insta::assert_snapshot!(
        case_lookup("lower(p.c_kon)", &map, Some(0)),
        @"CASE lower(p.c_kon) WHEN 'k' THEN 8532 WHEN 'm' THEN 8507 ELSE 0 END"
    );
}

proptest! {
    #[test]
    fn cleaning_is_idempotent(raw in "[a-z0-9(),;' \"\n\t-]{0,60}") {
        let once = clean_sql(&raw);
        prop_assert_eq!(clean_sql(&once), once.clone());
    }

    #[test]
    fn cleaned_sql_has_no_layout_whitespace(raw in "[a-z(),\n\t ]{0,60}") {
        let cleaned = clean_sql(&raw);
        prop_assert!(!cleaned.contains("  "));
        prop_assert!(!cleaned.contains('\n'));
        prop_assert!(!cleaned.contains(" ,"));
        prop_assert!(!cleaned.contains("( "));
    }
}
