//! Context serializer - renders graphs and rollups as prompt text
//!
//! Two blocks are produced:
//!
//! - the **subgraph facts**, one line per edge of the per-question subgraph
//! - the **standing context**, a fixed template over the rollups that is
//!   rendered once at startup and reused for every question
//!
//! Both renderings are pure functions of their input, so identical input
//! always yields byte-identical text.

use std::fmt::Write as _;

use crate::aggregate::{EntityLevel, Granularity, RankedEntity, RollupRecord, Rollups};
use crate::facts::Metrics;
use crate::graph::KnowledgeGraph;

/// Placeholder for a metrics node whose date is not in the subgraph
pub const UNKNOWN_DATE: &str = "unknown";

/// Render every edge of a graph as one line of text.
///
/// Edges into a metrics node become
/// `{site} on {date} had total in: {n}, group count: {g}, unique groups: {u}`,
/// with the date taken from the metrics node's `recorded_on` edge. Every
/// other edge becomes `{source} {relation} {target}`. Lines follow edge
/// insertion order.
pub fn graph_to_text(graph: &KnowledgeGraph) -> String {
    let mut lines = Vec::with_capacity(graph.edge_count());

    for edge in graph.edges() {
        match graph.metrics(&edge.target) {
            Some(metrics) => {
                let date = graph.recorded_on(&edge.target).unwrap_or(UNKNOWN_DATE);
                lines.push(format!(
                    "{} on {} had total in: {}, group count: {}, unique groups: {}",
                    edge.source,
                    date,
                    metrics.total_in,
                    metrics.group_count,
                    metrics.unique_groups
                ));
            }
            None => lines.push(format!("{} {} {}", edge.source, edge.relation, edge.target)),
        }
    }

    lines.join("\n")
}

/// Render the standing rollup context used as the system message
pub fn render_rollup_context(rollups: &Rollups, dataset_description: &str) -> String {
    let mut out = String::new();
    let summary = &rollups.summary;

    let _ = writeln!(
        out,
        "You are an intelligent assistant that answers queries about {}.",
        dataset_description
    );
    out.push('\n');

    out.push_str("SUMMARY STATISTICS:\n");
    let _ = writeln!(out, "- Total Visitors: {}", format_count(summary.totals.total_in));
    let _ = writeln!(out, "- Total Groups: {}", format_count(summary.totals.group_count));
    let _ = writeln!(
        out,
        "- Total Unique Groups: {}",
        format_count(summary.totals.unique_groups)
    );
    let _ = writeln!(out, "- Total Sites: {}", summary.site_count);
    let _ = writeln!(out, "- Total Areas: {}", summary.area_count);
    let _ = writeln!(out, "- Total Regions: {}", summary.region_count);
    match summary.date_span {
        Some((first, last)) => {
            let _ = writeln!(
                out,
                "- Date Range: {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            );
        }
        None => out.push_str("- Date Range: no dated observations\n"),
    }

    out.push_str("\nREGIONAL HIERARCHY:\n");
    for (region, areas) in &rollups.hierarchy {
        let _ = writeln!(out, "- {}: {}", region, areas.join(", "));
    }

    out.push_str("\nSITE LOCATIONS:\n");
    for loc in &rollups.site_locations {
        let _ = writeln!(out, "- {}: {}, {}", loc.site, loc.area, loc.region);
    }

    for (granularity, heading) in [
        (Granularity::Weekly, "WEEKLY"),
        (Granularity::Monthly, "MONTHLY"),
    ] {
        for (level, title) in [
            (EntityLevel::Region, "REGIONAL"),
            (EntityLevel::Area, "AREA"),
            (EntityLevel::Site, "SITE"),
        ] {
            let _ = writeln!(out, "\n{} {} PERFORMANCE:", heading, title);
            for record in rollups.records(level, granularity) {
                out.push_str(&performance_line(record, level));
                out.push('\n');
            }
        }
    }

    out.push_str("\nTOP PERFORMING SITES (by total visitors):\n");
    for entry in &rollups.top_sites {
        out.push_str(&ranking_line(entry));
        out.push('\n');
    }

    out.push_str("\nTOP PERFORMING REGIONS (by total visitors):\n");
    for entry in &rollups.region_ranking {
        out.push_str(&ranking_line(entry));
        out.push('\n');
    }

    out.push_str("\nTOP PERFORMING AREAS (by total visitors):\n");
    for entry in &rollups.top_areas {
        out.push_str(&ranking_line(entry));
        out.push('\n');
    }

    out.push_str(INSTRUCTIONS);
    out
}

const INSTRUCTIONS: &str = "
INSTRUCTIONS:
- Use this aggregated data to answer all types of queries about store visitor performance
- For specific daily queries, combine this summary data with the detailed graph facts provided
- For multi-region or calculation-heavy queries, rely primarily on the aggregated metrics above
- Calculate metrics, percentages, and comparisons using the summary data above
- Provide precise numerical answers with proper formatting (use commas for large numbers)
- When comparing regions or areas, use the performance data provided above
- Always provide context about which time period (daily, weekly, monthly) your answer refers to
";

fn performance_line(record: &RollupRecord, level: EntityLevel) -> String {
    let location = match level {
        EntityLevel::Site => format!(
            " ({}, {})",
            record.area.as_deref().unwrap_or("?"),
            record.region.as_deref().unwrap_or("?")
        ),
        EntityLevel::Area | EntityLevel::Region => String::new(),
    };
    format!(
        "- {}{} ({}): {}",
        record.entity,
        location,
        record.period.label(),
        metrics_phrase(&record.metrics)
    )
}

fn metrics_phrase(metrics: &Metrics) -> String {
    format!(
        "{} visitors, {} groups, {} unique groups",
        format_count(metrics.total_in),
        metrics.group_count,
        metrics.unique_groups
    )
}

fn ranking_line(entry: &RankedEntity) -> String {
    let location = match (&entry.area, &entry.region) {
        (Some(area), Some(region)) => format!(" ({}, {})", area, region),
        (None, Some(region)) => format!(" ({})", region),
        (Some(area), None) => format!(" ({})", area),
        (None, None) => String::new(),
    };
    format!(
        "- {}{}: {} total visitors",
        entry.name,
        location,
        format_count(entry.total_in)
    )
}

/// Format a count with thousands separators (`1234567` -> `1,234,567`)
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, c) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
