//! Entity recognizer - finds known sites, regions, areas and dates in a question
//!
//! Names are matched by case-insensitive substring containment against the
//! graph's site, region and area nodes. Dates are matched literally as
//! `DD-MM-YYYY` tokens without calendar validation; a token such as
//! `31-02-2025` is still returned and simply finds no metrics downstream.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::graph::{KnowledgeGraph, NodeType};

static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{2}-\d{2}-\d{4}\b").unwrap_or_else(|e| panic!("invalid date pattern: {e}"))
});

/// Entities mentioned in a question, grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecognizedEntities {
    pub sites: BTreeSet<String>,
    pub dates: BTreeSet<String>,
    pub regions: BTreeSet<String>,
    pub areas: BTreeSet<String>,
}

impl RecognizedEntities {
    /// True when nothing at all was recognized
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
            && self.dates.is_empty()
            && self.regions.is_empty()
            && self.areas.is_empty()
    }

    pub fn total(&self) -> usize {
        self.sites.len() + self.dates.len() + self.regions.len() + self.areas.len()
    }
}

/// Recognize the entities a question mentions
pub fn recognize(query: &str, graph: &KnowledgeGraph) -> RecognizedEntities {
    let lowered = query.to_lowercase();

    let mentioned = |node_type: NodeType| -> BTreeSet<String> {
        graph
            .nodes_of_type(node_type)
            .filter(|node| lowered.contains(&node.key.to_lowercase()))
            .map(|node| node.key.clone())
            .collect()
    };

    let entities = RecognizedEntities {
        sites: mentioned(NodeType::Site),
        dates: extract_dates(query),
        regions: mentioned(NodeType::Region),
        areas: mentioned(NodeType::Area),
    };

    debug!(
        sites = ?entities.sites,
        dates = ?entities.dates,
        regions = ?entities.regions,
        areas = ?entities.areas,
        "Recognized entities"
    );

    entities
}

/// All `DD-MM-YYYY` tokens in the text
pub fn extract_dates(text: &str) -> BTreeSet<String> {
    DATE_TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactRow, Metrics};
    use crate::graph::build_graph;

    fn graph() -> KnowledgeGraph {
        build_graph(&[
            FactRow::new("01-05-2025", "North", "Delhi NCR", "C1", "Alpha Mall", Metrics::new(10, 5, 4)),
            FactRow::new("01-05-2025", "South", "Chennai", "C2", "Beta Plaza", Metrics::new(20, 8, 6)),
        ])
    }

    #[test]
    fn test_site_and_date() {
        let entities = recognize("How many visitors did alpha mall have on 01-05-2025?", &graph());
        assert_eq!(entities.sites, BTreeSet::from(["Alpha Mall".to_string()]));
        assert_eq!(entities.dates, BTreeSet::from(["01-05-2025".to_string()]));
        assert!(entities.regions.is_empty());
        assert!(entities.areas.is_empty());
    }

    #[test]
    fn test_all_matches_are_returned() {
        let entities = recognize("Compare ALPHA MALL and Beta Plaza in north vs south", &graph());
        assert_eq!(entities.sites.len(), 2);
        assert_eq!(entities.regions.len(), 2);
        assert_eq!(entities.total(), 4);
    }

    #[test]
    fn test_area_match() {
        let entities = recognize("What happened in chennai last week?", &graph());
        assert_eq!(entities.areas, BTreeSet::from(["Chennai".to_string()]));
        assert!(entities.sites.is_empty());
    }

    #[test]
    fn test_date_tokens_are_not_validated() {
        let dates = extract_dates("between 31-02-2025 and 1-5-2025 or 2025-05-01, also 03-05-2025.");
        assert_eq!(
            dates,
            BTreeSet::from(["31-02-2025".to_string(), "03-05-2025".to_string()])
        );
    }

    #[test]
    fn test_nothing_recognized() {
        let entities = recognize("What is the meaning of life?", &graph());
        assert!(entities.is_empty());
        assert_eq!(entities.total(), 0);
    }

    #[test]
    fn test_date_node_names_are_not_sites() {
        let entities = recognize("01-05-2025", &graph());
        assert!(entities.sites.is_empty());
        assert_eq!(entities.dates.len(), 1);
    }
}
