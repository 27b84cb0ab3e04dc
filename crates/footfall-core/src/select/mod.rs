//! Subgraph selector - picks a bounded, relevant node set for a question
//!
//! Strategies are tried in a strict order and only the first one whose
//! entities were recognized runs:
//!
//! 1. sites (narrowed to the mentioned dates, when there are any)
//! 2. dates
//! 3. regions
//! 4. areas
//!
//! When nothing was recognized, or the chosen strategy found no metrics, a
//! fixed sample of the first graph nodes is used instead. The final key set
//! is capped; truncation keeps the lexicographically smallest keys so the
//! same question always yields the same subgraph.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::graph::{KnowledgeGraph, NodeType, Relation, metrics_key};
use crate::recognize::RecognizedEntities;

/// Which branch produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Metrics of mentioned sites on mentioned dates
    SiteDates,
    /// All metrics of mentioned sites
    Sites,
    /// All metrics recorded on mentioned dates
    Dates,
    /// All metrics of the sites in mentioned regions
    Regions,
    /// All metrics of the sites in mentioned areas
    Areas,
    /// Fixed sample of the graph
    Fallback,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SiteDates => "site_dates",
            Self::Sites => "sites",
            Self::Dates => "dates",
            Self::Regions => "regions",
            Self::Areas => "areas",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Limits applied while selecting
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Maximum number of keys in a selection
    pub max_nodes: usize,
    /// Number of leading graph nodes used as the fallback sample
    pub fallback_sample: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_nodes: 50,
            fallback_sample: 30,
        }
    }
}

impl From<&RetrievalConfig> for SelectionConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            max_nodes: config.max_subgraph_nodes,
            fallback_sample: config.fallback_sample_nodes,
        }
    }
}

/// A chosen node key set and how it was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub keys: BTreeSet<String>,
    pub strategy: SelectionStrategy,
    /// Number of keys before the cap was applied
    pub candidates: usize,
    pub truncated: bool,
}

/// Selects subgraphs according to [`SelectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct SubgraphSelector {
    config: SelectionConfig,
}

impl SubgraphSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Select the node keys relevant to the recognized entities
    pub fn select(&self, graph: &KnowledgeGraph, entities: &RecognizedEntities) -> Selection {
        let (mut strategy, mut keys) = if !entities.sites.is_empty() {
            if entities.dates.is_empty() {
                (SelectionStrategy::Sites, select_sites(graph, &entities.sites))
            } else {
                (
                    SelectionStrategy::SiteDates,
                    select_site_dates(graph, &entities.sites, &entities.dates),
                )
            }
        } else if !entities.dates.is_empty() {
            (SelectionStrategy::Dates, select_dates(graph, &entities.dates))
        } else if !entities.regions.is_empty() {
            (
                SelectionStrategy::Regions,
                select_containers(graph, &entities.regions, Relation::LocatedInRegion),
            )
        } else if !entities.areas.is_empty() {
            (
                SelectionStrategy::Areas,
                select_containers(graph, &entities.areas, Relation::LocatedInArea),
            )
        } else {
            (SelectionStrategy::Fallback, BTreeSet::new())
        };

        if keys.is_empty() {
            if strategy != SelectionStrategy::Fallback {
                debug!(strategy = %strategy, "No metrics matched, using fallback sample");
            }
            strategy = SelectionStrategy::Fallback;
            keys = fallback_sample(graph, self.config.fallback_sample);
        }

        let candidates = keys.len();
        let truncated = candidates > self.config.max_nodes;
        if truncated {
            warn!(
                candidates,
                max_nodes = self.config.max_nodes,
                "Selection exceeds cap, truncating by key order"
            );
            keys = keys.into_iter().take(self.config.max_nodes).collect();
        }

        info!(strategy = %strategy, nodes = keys.len(), truncated, "Subgraph selected");

        Selection {
            keys,
            strategy,
            candidates,
            truncated,
        }
    }
}

/// Select with the default limits
pub fn select(graph: &KnowledgeGraph, entities: &RecognizedEntities) -> Selection {
    SubgraphSelector::default().select(graph, entities)
}

/// Add a metrics node together with its direct successors and predecessors
fn include_neighborhood(graph: &KnowledgeGraph, metrics_node: &str, keys: &mut BTreeSet<String>) {
    keys.insert(metrics_node.to_string());
    keys.extend(graph.successors(metrics_node).into_iter().map(str::to_string));
    keys.extend(graph.predecessors(metrics_node).into_iter().map(str::to_string));
}

fn is_metrics_node(graph: &KnowledgeGraph, key: &str) -> bool {
    graph
        .node(key)
        .is_some_and(|node| node.node_type() == NodeType::DailyMetrics)
}

/// Metrics nodes whose key starts with `{site}_`
fn site_metrics<'g>(graph: &'g KnowledgeGraph, site: &str) -> impl Iterator<Item = &'g str> {
    let prefix = format!("{}_", site);
    graph
        .nodes_of_type(NodeType::DailyMetrics)
        .filter(move |node| node.key.starts_with(&prefix))
        .map(|node| node.key.as_str())
}

fn select_site_dates(
    graph: &KnowledgeGraph,
    sites: &BTreeSet<String>,
    dates: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for site in sites {
        for date in dates {
            let key = metrics_key(site, date);
            if is_metrics_node(graph, &key) {
                keys.insert(site.clone());
                keys.insert(date.clone());
                include_neighborhood(graph, &key, &mut keys);
            } else {
                debug!(site = %site, date = %date, "No metrics recorded for site on date");
            }
        }
    }
    keys
}

fn select_sites(graph: &KnowledgeGraph, sites: &BTreeSet<String>) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for site in sites {
        for metrics_node in site_metrics(graph, site) {
            keys.insert(site.clone());
            include_neighborhood(graph, metrics_node, &mut keys);
        }
    }
    keys
}

fn select_dates(graph: &KnowledgeGraph, dates: &BTreeSet<String>) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for date in dates {
        let recorded: Vec<&str> = graph
            .in_edges(date)
            .filter(|e| e.relation == Relation::RecordedOn && is_metrics_node(graph, &e.source))
            .map(|e| e.source.as_str())
            .collect();
        for metrics_node in recorded {
            keys.insert(date.clone());
            include_neighborhood(graph, metrics_node, &mut keys);
        }
    }
    keys
}

/// Metrics of every site linked to one of the containers (regions or areas)
/// by `relation`, plus the container nodes themselves
fn select_containers(
    graph: &KnowledgeGraph,
    containers: &BTreeSet<String>,
    relation: Relation,
) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for container in containers {
        let sites: BTreeSet<&str> = graph
            .in_edges(container)
            .filter(|e| e.relation == relation)
            .map(|e| e.source.as_str())
            .collect();

        for site in sites {
            for metrics_node in site_metrics(graph, site) {
                keys.insert(site.to_string());
                keys.insert(container.clone());
                include_neighborhood(graph, metrics_node, &mut keys);
            }
        }
    }
    keys
}

/// The first `size` nodes in insertion order
fn fallback_sample(graph: &KnowledgeGraph, size: usize) -> BTreeSet<String> {
    graph.nodes().take(size).map(|n| n.key.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactRow, Metrics};
    use crate::graph::build_graph;

    fn rows() -> Vec<FactRow> {
        vec![
            FactRow::new("01-05-2025", "North", "A1", "C1", "Alpha", Metrics::new(10, 5, 4)),
            FactRow::new("02-05-2025", "North", "A1", "C1", "Alpha", Metrics::new(11, 5, 4)),
            FactRow::new("01-05-2025", "North", "A2", "C2", "Beta", Metrics::new(20, 8, 6)),
            FactRow::new("01-05-2025", "South", "B1", "C3", "Gamma", Metrics::new(30, 9, 7)),
        ]
    }

    fn entities(sites: &[&str], dates: &[&str], regions: &[&str], areas: &[&str]) -> RecognizedEntities {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        RecognizedEntities {
            sites: set(sites),
            dates: set(dates),
            regions: set(regions),
            areas: set(areas),
        }
    }

    #[test]
    fn test_site_and_date() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&["Alpha"], &["01-05-2025"], &[], &[]));
        assert_eq!(selection.strategy, SelectionStrategy::SiteDates);
        assert_eq!(
            selection.keys,
            BTreeSet::from([
                "Alpha".to_string(),
                "01-05-2025".to_string(),
                "Alpha_01-05-2025_metrics".to_string(),
            ])
        );
    }

    #[test]
    fn test_site_without_dates_takes_all_metrics() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&["Alpha"], &[], &[], &[]));
        assert_eq!(selection.strategy, SelectionStrategy::Sites);
        assert!(selection.keys.contains("Alpha_01-05-2025_metrics"));
        assert!(selection.keys.contains("Alpha_02-05-2025_metrics"));
        assert!(selection.keys.contains("02-05-2025"));
        assert!(!selection.keys.contains("Beta"));
    }

    #[test]
    fn test_missing_site_date_pair_is_skipped() {
        let graph = build_graph(&rows());
        let selection = select(
            &graph,
            &entities(&["Alpha", "Beta"], &["02-05-2025"], &[], &[]),
        );
        assert_eq!(selection.strategy, SelectionStrategy::SiteDates);
        assert!(selection.keys.contains("Alpha_02-05-2025_metrics"));
        assert!(!selection.keys.contains("Beta"));
    }

    #[test]
    fn test_sites_take_precedence_over_regions() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&["Gamma"], &[], &["North"], &[]));
        assert_eq!(selection.strategy, SelectionStrategy::Sites);
        assert!(!selection.keys.contains("North"));
    }

    #[test]
    fn test_dates_only() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&[], &["01-05-2025"], &["South"], &[]));
        assert_eq!(selection.strategy, SelectionStrategy::Dates);
        assert!(selection.keys.contains("Alpha_01-05-2025_metrics"));
        assert!(selection.keys.contains("Beta_01-05-2025_metrics"));
        assert!(selection.keys.contains("Gamma_01-05-2025_metrics"));
        assert!(!selection.keys.contains("Alpha_02-05-2025_metrics"));
    }

    #[test]
    fn test_region() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&[], &[], &["North"], &[]));
        assert_eq!(selection.strategy, SelectionStrategy::Regions);
        assert!(selection.keys.contains("North"));
        assert!(selection.keys.contains("Alpha"));
        assert!(selection.keys.contains("Beta_01-05-2025_metrics"));
        assert!(!selection.keys.contains("Gamma"));
    }

    #[test]
    fn test_area() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&[], &[], &[], &["A2"]));
        assert_eq!(selection.strategy, SelectionStrategy::Areas);
        assert!(selection.keys.contains("A2"));
        assert!(selection.keys.contains("Beta_01-05-2025_metrics"));
        assert!(!selection.keys.contains("Alpha"));
    }

    #[test]
    fn test_fallback_when_nothing_recognized() {
        let graph = build_graph(&rows());
        let selector = SubgraphSelector::new(SelectionConfig {
            max_nodes: 50,
            fallback_sample: 4,
        });
        let selection = selector.select(&graph, &RecognizedEntities::default());
        assert_eq!(selection.strategy, SelectionStrategy::Fallback);
        let expected: BTreeSet<String> = graph.nodes().take(4).map(|n| n.key.clone()).collect();
        assert_eq!(selection.keys, expected);
    }

    #[test]
    fn test_fallback_when_strategy_finds_nothing() {
        let graph = build_graph(&rows());
        let selection = select(&graph, &entities(&["Gamma"], &["09-05-2025"], &[], &[]));
        assert_eq!(selection.strategy, SelectionStrategy::Fallback);
        assert!(!selection.keys.is_empty());
    }

    #[test]
    fn test_cap_is_deterministic() {
        let graph = build_graph(&rows());
        let selector = SubgraphSelector::new(SelectionConfig {
            max_nodes: 3,
            fallback_sample: 30,
        });
        let sel = entities(&[], &["01-05-2025"], &[], &[]);
        let first = selector.select(&graph, &sel);
        let second = selector.select(&graph, &sel);
        assert!(first.truncated);
        assert_eq!(first.keys.len(), 3);
        assert!(first.candidates > 3);
        assert_eq!(first, second);
        let smallest: Vec<_> = first.keys.iter().cloned().collect();
        assert_eq!(smallest[0], "01-05-2025");
    }
}
