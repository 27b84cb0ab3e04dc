//! Node and edge types for the fact graph
//!
//! Nodes are keyed by name: a site, area, region or site code name, a raw
//! date string, or a synthesized `{site}_{date}_metrics` key for a site's
//! counters on one day. Edges are directed and carry one relation from a
//! fixed vocabulary.

use serde::{Deserialize, Serialize};

use crate::facts::Metrics;

/// Key of the metrics node holding a site's counters for one day
pub fn metrics_key(site: &str, date: &str) -> String {
    format!("{}_{}_metrics", site, date)
}

/// A vertex in the fact graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Identity of the node within the graph
    pub key: String,
    /// Kind tag plus kind-specific attributes
    pub kind: NodeKind,
}

impl Node {
    pub fn new(key: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Counters carried by a metrics node
    pub fn metrics(&self) -> Option<Metrics> {
        match self.kind {
            NodeKind::DailyMetrics(metrics) => Some(metrics),
            _ => None,
        }
    }
}

/// Node variants and their attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Site,
    Area,
    Region,
    Code,
    Date,
    DailyMetrics(Metrics),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Site => NodeType::Site,
            Self::Area => NodeType::Area,
            Self::Region => NodeType::Region,
            Self::Code => NodeType::Code,
            Self::Date => NodeType::Date,
            Self::DailyMetrics(_) => NodeType::DailyMetrics,
        }
    }
}

/// Attribute-free tag for a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Site,
    Area,
    Region,
    Code,
    Date,
    DailyMetrics,
}

impl NodeType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Site => "Site",
            Self::Area => "Area",
            Self::Region => "Region",
            Self::Code => "Code",
            Self::Date => "Date",
            Self::DailyMetrics => "DailyMetrics",
        }
    }

    /// Get all node types
    pub fn all() -> &'static [NodeType] {
        &[
            Self::Site,
            Self::Area,
            Self::Region,
            Self::Code,
            Self::Date,
            Self::DailyMetrics,
        ]
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relation carried by an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Site is located in an area
    LocatedInArea,
    /// Site is located in a region
    LocatedInRegion,
    /// Site is identified by a site code
    HasCode,
    /// Site has a metrics node for one day
    HasMetricsOn,
    /// Metrics node was recorded on a date
    RecordedOn,
}

impl Relation {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocatedInArea => "located_in_area",
            Self::LocatedInRegion => "located_in_region",
            Self::HasCode => "has_code",
            Self::HasMetricsOn => "has_metrics_on",
            Self::RecordedOn => "recorded_on",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "located_in_area" => Some(Self::LocatedInArea),
            "located_in_region" => Some(Self::LocatedInRegion),
            "has_code" => Some(Self::HasCode),
            "has_metrics_on" => Some(Self::HasMetricsOn),
            "recorded_on" => Some(Self::RecordedOn),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed, relation-labeled edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub relation: Relation,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, relation: Relation, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            relation,
            target: target.into(),
        }
    }
}
