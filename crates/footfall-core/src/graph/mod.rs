//! Fact graph - typed nodes and relation-labeled edges built from the fact table
//!
//! ## Data Model
//!
//! - **Node**: a key plus a [`NodeKind`] (site, area, region, code, date,
//!   or a daily metrics record carrying the three counters)
//! - **Edge**: a directed `(source, relation, target)` triple; parallel
//!   edges between the same pair are kept
//!
//! ```text
//!          located_in_area ──► Area
//!          located_in_region ► Region
//!   Site ─ has_code ─────────► Code
//!          has_metrics_on ──► {site}_{date}_metrics ─ recorded_on ─► Date
//! ```
//!
//! The graph is built once and only read afterwards. Iteration over nodes
//! and edges follows insertion order, which keeps everything derived from
//! it deterministic.

mod builder;
mod node;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::facts::Metrics;

pub use builder::{BuildReport, GraphBuilder, build_graph};
pub use node::{Edge, Node, NodeKind, NodeType, Relation, metrics_key};

/// Directed multigraph of typed nodes
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

/// Node and edge counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes_by_type: BTreeMap<NodeType, usize>,
    pub node_count: usize,
    pub edge_count: usize,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or replace the kind and attributes of an existing one.
    ///
    /// Returns `true` when the key was new.
    pub fn upsert_node(&mut self, key: impl Into<String>, kind: NodeKind) -> bool {
        let key = key.into();
        match self.index.get(&key) {
            Some(&idx) => {
                self.nodes[idx].kind = kind;
                false
            }
            None => {
                self.index.insert(key.clone(), self.nodes.len());
                self.nodes.push(Node::new(key, kind));
                true
            }
        }
    }

    /// Append an edge between two existing nodes
    pub fn add_edge(&mut self, source: &str, relation: Relation, target: &str) -> Result<()> {
        for endpoint in [source, target] {
            if !self.contains(endpoint) {
                return Err(Error::UnknownEntity(endpoint.to_string()));
            }
        }

        let idx = self.edges.len();
        self.edges.push(Edge::new(source, relation, target));
        self.outgoing.entry(source.to_string()).or_default().push(idx);
        self.incoming.entry(target.to_string()).or_default().push(idx);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn node(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&idx| &self.nodes[idx])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Nodes of one type, in insertion order
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(move |node| node.node_type() == node_type)
    }

    /// Edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Edges leaving a node, in insertion order
    pub fn out_edges(&self, key: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(key)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Edges entering a node, in insertion order
    pub fn in_edges(&self, key: &str) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(key)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Distinct targets of a node's outgoing edges
    pub fn successors(&self, key: &str) -> BTreeSet<&str> {
        self.out_edges(key).map(|e| e.target.as_str()).collect()
    }

    /// Distinct sources of a node's incoming edges
    pub fn predecessors(&self, key: &str) -> BTreeSet<&str> {
        self.in_edges(key).map(|e| e.source.as_str()).collect()
    }

    /// Counters of a metrics node
    pub fn metrics(&self, key: &str) -> Option<Metrics> {
        self.node(key).and_then(Node::metrics)
    }

    /// Date a metrics node was recorded on, following its `recorded_on` edge
    pub fn recorded_on(&self, metrics_key: &str) -> Option<&str> {
        self.out_edges(metrics_key)
            .find(|e| e.relation == Relation::RecordedOn)
            .map(|e| e.target.as_str())
    }

    /// Restrict the graph to a key set.
    ///
    /// Keys that are not in the graph are ignored. The result keeps the
    /// original insertion order of nodes and edges, and only the edges whose
    /// endpoints are both kept.
    pub fn restrict(&self, keys: &BTreeSet<String>) -> KnowledgeGraph {
        let mut subgraph = KnowledgeGraph::new();

        for node in self.nodes.iter().filter(|n| keys.contains(&n.key)) {
            subgraph.upsert_node(node.key.clone(), node.kind);
        }

        for edge in &self.edges {
            if subgraph.contains(&edge.source) && subgraph.contains(&edge.target) {
                let idx = subgraph.edges.len();
                subgraph.edges.push(edge.clone());
                subgraph
                    .outgoing
                    .entry(edge.source.clone())
                    .or_default()
                    .push(idx);
                subgraph
                    .incoming
                    .entry(edge.target.clone())
                    .or_default()
                    .push(idx);
            }
        }

        subgraph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_type = BTreeMap::new();
        for node in &self.nodes {
            *nodes_by_type.entry(node.node_type()).or_insert(0) += 1;
        }
        GraphStats {
            nodes_by_type,
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
        }
    }
}
