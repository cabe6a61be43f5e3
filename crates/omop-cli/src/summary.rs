use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use omop_core::{RunSummary, StepRecord, StepStatus};

use crate::commands::RunOutcome;

pub fn print_outcome(outcome: &RunOutcome) {
    if let Some(script) = &outcome.script {
        println!("{script}");
    }
    println!("{}", steps_table(&outcome.report.records));
    if let Some(summary) = outcome.summary() {
        println!("{}", counts_table(&summary));
    }
}

pub fn print_step_listing(steps: &[(String, i32, String)]) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Step"),
        header_cell("Ordinal"),
        header_cell("Description"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    for (key, ordinal, description) in steps {
        table.add_row(vec![
            Cell::new(key).fg(Color::Blue),
            Cell::new(ordinal),
            Cell::new(description),
        ]);
    }
    println!("{table}");
}

pub fn steps_table(records: &[StepRecord]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Step"),
        header_cell("Ordinal"),
        header_cell("Status"),
        header_cell("Rows"),
        header_cell("Duration (ms)"),
    ]);
    apply_table_style(&mut table);
    for index in [1, 3, 4] {
        align_column(&mut table, index, CellAlignment::Right);
    }
    for record in records {
        let status = match record.status {
            StepStatus::Succeeded => Cell::new(record.status.as_str()).fg(Color::Green),
            StepStatus::Failed => Cell::new(record.status.as_str())
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
        };
        table.add_row(vec![
            Cell::new(&record.key),
            Cell::new(record.ordinal),
            status,
            record.rows.map_or_else(|| dim_cell("-"), Cell::new),
            Cell::new(record.duration_ms()),
        ]);
    }
    table
}

/// Row counts of the CDM tables with a total line.
pub fn counts_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Table"), header_cell("Rows")]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    let mut total = 0u64;
    for count in &summary.counts {
        total += count.rows;
        let rows = if count.rows == 0 {
            dim_cell(count.rows)
        } else {
            Cell::new(count.rows)
        };
        table.add_row(vec![Cell::new(&count.table), rows]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(total).add_attribute(Attribute::Bold),
    ]);
    table
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
