//! Plain-text summaries printed at the end of each command.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::{
    ingest::{EntityKind, IngestReport},
    migrate::MigrationReport,
    plan::MigrationPlan,
};

/// Renders `rows` under `headers` with two-space column gaps.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count())
        .collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(single_line(cell).chars().count());
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn single_line(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let cell = single_line(cell);
            let pad = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(pad))
        })
        .join("  ");
    line.trim_end().to_string()
}

pub fn migration_table(report: &MigrationReport) -> String {
    let rows = report
        .tables
        .iter()
        .map(|t| {
            vec![
                t.table.clone(),
                t.state.to_string(),
                t.fetched.to_string(),
                t.dropped.to_string(),
                t.merged.to_string(),
                format!("{}/{}", t.batches_sent, t.batches_total),
                t.accepted.to_string(),
                t.error.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        &[
            "table", "state", "fetched", "dropped", "merged", "batches", "accepted", "error",
        ],
        &rows,
    )
}

pub fn ingest_table(report: &IngestReport) -> String {
    let rows = [
        ("rows read", report.rows),
        ("products created", report.products),
        ("rows skipped", report.skipped),
        ("brands created", report.created(EntityKind::Brand)),
        ("suppliers created", report.created(EntityKind::Supplier)),
        ("categories created", report.created(EntityKind::Category)),
        ("images inserted", report.images),
        ("image batches failed", report.image_failures),
    ]
    .iter()
    .map(|(label, count)| vec![label.to_string(), count.to_string()])
    .collect::<Vec<_>>();
    render_table(&["metric", "count"], &rows)
}

pub fn plan_table(plan: &MigrationPlan) -> String {
    let rows = plan
        .tables
        .iter()
        .enumerate()
        .map(|(idx, table)| {
            let foreign_keys = table
                .foreign_keys
                .iter()
                .map(|(column, target)| format!("{column}->{target}"))
                .join(",");
            let columns = table
                .columns
                .as_ref()
                .map(|c| c.len().to_string())
                .unwrap_or_else(|| "all".to_string());
            let slug = table
                .slug
                .as_ref()
                .map(|s| format!("{}<-{}", s.into, s.from))
                .unwrap_or_default();
            vec![
                (idx + 1).to_string(),
                table.name.clone(),
                if table.remap_key { "yes" } else { "" }.to_string(),
                columns,
                foreign_keys,
                table.required.join(","),
                table.upsert_on.clone().unwrap_or_default(),
                slug,
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        &[
            "#", "table", "remap", "columns", "foreign keys", "required", "upsert", "slug",
        ],
        &rows,
    )
}
