//! Footfall Core Library
//!
//! This crate provides the core functionality for Footfall, including:
//! - Fact table loading (CSV and JSON Lines)
//! - Knowledge graph construction over sites, areas, regions and dates
//! - Daily, weekly and monthly rollups with rankings
//! - Entity recognition and subgraph selection for questions
//! - Prompt context rendering
//! - LLM integration (OpenAI-compatible API, Groq by default)
//! - Graph-grounded answer orchestration

pub mod facts;
pub mod graph;
pub mod aggregate;
pub mod recognize;
pub mod select;
pub mod context;
pub mod llm;
pub mod answer;
pub mod config;
pub mod error;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregate::{Rollups, aggregate};
    pub use crate::answer::{AnswerGenerator, GraphRagAgent};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::facts::{FactRow, FactTable, Metrics};
    pub use crate::graph::{KnowledgeGraph, build_graph};
}
