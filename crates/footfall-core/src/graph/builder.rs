//! Graph builder - turns fact rows into nodes and edges

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::facts::{FactRow, FactTable};

use super::KnowledgeGraph;
use super::node::{NodeKind, Relation, metrics_key};

/// Outcome of a build: the graph plus per-row bookkeeping
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub graph: KnowledgeGraph,
    /// Rows ingested into the graph
    pub ingested: usize,
    /// Rows whose metrics node already existed and was overwritten
    pub overwritten: usize,
    /// Rows that could not be ingested
    pub skipped: usize,
}

/// Builds the fact graph from normalized rows
#[derive(Debug, Default)]
pub struct GraphBuilder {
    report: BuildReport,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one observation.
    ///
    /// Upserts the site, area, region, code and date nodes plus the
    /// `{site}_{date}_metrics` node, then links them with five edges.
    /// Re-ingesting the same (site, date) pair overwrites the counters.
    pub fn ingest(&mut self, row: &FactRow) -> Result<()> {
        let graph = &mut self.report.graph;
        let metrics_node = metrics_key(&row.site_name, &row.date);

        graph.upsert_node(&row.site_name, NodeKind::Site);
        graph.upsert_node(&row.area, NodeKind::Area);
        graph.upsert_node(&row.region, NodeKind::Region);
        graph.upsert_node(&row.site_code, NodeKind::Code);
        graph.upsert_node(&row.date, NodeKind::Date);
        let is_new = graph.upsert_node(&metrics_node, NodeKind::DailyMetrics(row.metrics));

        graph.add_edge(&row.site_name, Relation::LocatedInArea, &row.area)?;
        graph.add_edge(&row.site_name, Relation::LocatedInRegion, &row.region)?;
        graph.add_edge(&row.site_name, Relation::HasCode, &row.site_code)?;
        graph.add_edge(&row.site_name, Relation::HasMetricsOn, &metrics_node)?;
        graph.add_edge(&metrics_node, Relation::RecordedOn, &row.date)?;

        if !is_new {
            debug!(key = %metrics_node, "Overwrote existing metrics node");
            self.report.overwritten += 1;
        }
        self.report.ingested += 1;
        Ok(())
    }

    /// Ingest every row, logging and skipping any that fail
    pub fn ingest_all<'a>(&mut self, rows: impl IntoIterator<Item = &'a FactRow>) {
        for (idx, row) in rows.into_iter().enumerate() {
            if let Err(e) = self.ingest(row) {
                warn!(row = idx, site = %row.site_name, error = %e, "Skipping row during graph build");
                self.report.skipped += 1;
            }
        }
    }

    pub fn finish(self) -> BuildReport {
        let report = self.report;
        info!(
            nodes = report.graph.node_count(),
            edges = report.graph.edge_count(),
            ingested = report.ingested,
            overwritten = report.overwritten,
            skipped = report.skipped,
            "Fact graph built"
        );
        report
    }

    /// Build a graph from a whole fact table
    pub fn build(table: &FactTable) -> BuildReport {
        let mut builder = Self::new();
        builder.ingest_all(table.rows());
        builder.finish()
    }
}

/// Build a graph from rows, discarding the report
pub fn build_graph(rows: &[FactRow]) -> KnowledgeGraph {
    let mut builder = GraphBuilder::new();
    builder.ingest_all(rows);
    builder.finish().graph
}
