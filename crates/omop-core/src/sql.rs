//! SQL text helpers.
//!
//! Every statement is generated as text and normalised with [`clean_sql`]
//! before it reaches a session. [`Expr`] is a small expression tree used
//! where generated SQL needs CASE/COALESCE arithmetic, such as the drug
//! quantity recipes.

use std::collections::BTreeMap;
use std::fmt;

/// Collapses whitespace outside quoted text, drops `--` comments, removes
/// spaces before `,` `)` `;` and after `(`, and trims the result.
///
/// Quoted text (`'...'` and `"..."`) is copied unchanged. Cleaning is
/// idempotent.
pub fn clean_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if in_single || in_double {
            out.push(c);
            if in_single && c == '\'' {
                in_single = false;
            } else if in_double && c == '"' {
                in_double = false;
            }
            continue;
        }
        if c == '-' && chars.peek() == Some(&'-') {
            for skipped in chars.by_ref() {
                if skipped == '\n' {
                    break;
                }
            }
            pending_space = true;
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with('(') && !matches!(c, ',' | ')' | ';')
        {
            out.push(' ');
        }
        pending_space = false;
        match c {
            '\'' => in_single = true,
            '"' => in_double = true,
            _ => {}
        }
        out.push(c);
    }
    out.truncate(out.trim_end().len());
    out
}

/// Single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Identifier, double-quoted unless it is a plain lowercase name.
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Literal for an optional text value; `None` becomes `NULL`.
pub fn text_or_null(value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_string(), quote_literal)
}

/// Literal for an optional number; `None` becomes `NULL`.
pub fn number_or_null<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "NULL".to_string(), |v| v.to_string())
}

/// `CASE <operand> WHEN 'k' THEN v ... ELSE <otherwise> END` over an in-memory map.
pub fn case_lookup(operand: &str, map: &BTreeMap<String, i32>, otherwise: Option<i32>) -> String {
    let expr = Expr::Switch {
        operand: Box::new(Expr::column(operand)),
        arms: map
            .iter()
            .map(|(key, value)| (Expr::text(key), Expr::int(i64::from(*value))))
            .collect(),
        otherwise: Box::new(otherwise.map_or(Expr::Null, |v| Expr::int(i64::from(v)))),
    };
    expr.to_string()
}

/// `INSERT INTO table (cols) VALUES (...), (...)` split into batches.
///
/// Each row holds already-rendered SQL literals.
pub fn insert_values(
    table: &str,
    columns: &[&str],
    rows: &[Vec<String>],
    batch_size: usize,
) -> Vec<String> {
    rows.chunks(batch_size.max(1))
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|row| format!("({})", row.join(", ")))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {table} ({}) VALUES {values}",
                columns.join(", ")
            )
        })
        .collect()
}

/// Arithmetic operators used by [`Expr::Binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A boolean condition inside a CASE branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(Expr, Expr),
    Like(Expr, String),
    IsNull(Expr),
    And(Vec<Cond>),
    Or(Vec<Cond>),
    Raw(String),
}

impl Cond {
    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Cond::Eq(lhs, rhs)
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Eq(lhs, rhs) => write!(f, "{lhs} = {rhs}"),
            Cond::Like(expr, pattern) => write!(f, "{expr} LIKE {}", quote_literal(pattern)),
            Cond::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Cond::And(parts) => write_joined(f, parts, " AND "),
            Cond::Or(parts) => write_joined(f, parts, " OR "),
            Cond::Raw(sql) => f.write_str(sql),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Cond], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

/// SQL value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    /// Column reference or other verbatim SQL.
    Column(String),
    Number(f64),
    Int(i64),
    Text(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Coalesce(Vec<Expr>),
    /// Searched CASE.
    Case {
        branches: Vec<(Cond, Expr)>,
        otherwise: Box<Expr>,
    },
    /// Simple CASE over an operand.
    Switch {
        operand: Box<Expr>,
        arms: Vec<(Expr, Expr)>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn column(name: &str) -> Self {
        Expr::Column(name.to_string())
    }

    pub fn number(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn text(value: &str) -> Self {
        Expr::Text(value.to_string())
    }

    pub fn coalesce(items: Vec<Expr>) -> Self {
        Expr::Coalesce(items)
    }

    pub fn case(branches: Vec<(Cond, Expr)>, otherwise: Expr) -> Self {
        Expr::Case {
            branches,
            otherwise: Box::new(otherwise),
        }
    }

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Mul, self, rhs)
    }

    /// Division; a zero divisor yields NULL.
    pub fn div(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Div, self, rhs)
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => f.write_str("NULL"),
            Expr::Column(name) => f.write_str(name),
            Expr::Number(value) if value.is_nan() => f.write_str("'NaN'::numeric"),
            Expr::Number(value) if value.is_infinite() => {
                let sign = if value.is_sign_negative() { "-" } else { "" };
                write!(f, "'{sign}Infinity'::numeric")
            }
            Expr::Number(value) => write!(f, "{value}"),
            Expr::Int(value) => write!(f, "{value}"),
            Expr::Text(value) => f.write_str(&quote_literal(value)),
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::Add => write!(f, "({lhs} + {rhs})"),
                BinaryOp::Sub => write!(f, "({lhs} - {rhs})"),
                BinaryOp::Mul => write!(f, "({lhs} * {rhs})"),
                BinaryOp::Div => write!(f, "({lhs} / nullif({rhs}, 0))"),
            },
            Expr::Coalesce(items) => {
                f.write_str("coalesce(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                f.write_str("CASE")?;
                for (cond, value) in branches {
                    write!(f, " WHEN {cond} THEN {value}")?;
                }
                write!(f, " ELSE {otherwise} END")
            }
            Expr::Switch {
                operand,
                arms,
                otherwise,
            } => {
                write!(f, "CASE {operand}")?;
                for (key, value) in arms {
                    write!(f, " WHEN {key} THEN {value}")?;
                }
                write!(f, " ELSE {otherwise} END")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert_eq!(quote_ident("omopcdm"), "omopcdm");
        assert_eq!(quote_ident("Site A"), "\"Site A\"");
        assert_eq!(text_or_null(None), "NULL");
        assert_eq!(number_or_null(Some(8507)), "8507");
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(clean_sql("SELECT 1 -- one\n, 2"), "SELECT 1, 2");
        assert_eq!(clean_sql("SELECT '--kept'"), "SELECT '--kept'");
    }

    #[test]
    fn non_finite_numbers_render_as_numeric_literals() {
        assert_eq!(Expr::number(f64::NAN).render(), "'NaN'::numeric");
        assert_eq!(Expr::number(f64::INFINITY).render(), "'Infinity'::numeric");
        assert_eq!(
            Expr::number(0.6).mul(Expr::number(f64::NEG_INFINITY)).render(),
            "(0.6 * '-Infinity'::numeric)"
        );
    }

    #[test]
    fn batches_split_rows() {
        let rows = vec![
            vec!["1".to_string()],
            vec!["2".to_string()],
            vec!["3".to_string()],
        ];
        let statements = insert_values("t", &["a"], &rows, 2);
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t (a) VALUES (1), (2)",
                "INSERT INTO t (a) VALUES (3)"
            ]
        );
    }
}
