//! Answer orchestrator - turns a question into a grounded language-model call
//!
//! Per question the agent runs recognize → select → restrict → serialize
//! against the shared read-only graph, wraps the resulting facts and the
//! literal question into a user message, and hands that to an
//! [`AnswerGenerator`] together with the standing rollup context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::Rollups;
use crate::config::Config;
use crate::context::{graph_to_text, render_rollup_context};
use crate::error::{Error, Result};
use crate::graph::KnowledgeGraph;
use crate::recognize::{RecognizedEntities, recognize};
use crate::select::{Selection, SelectionConfig, SelectionStrategy, SubgraphSelector};

/// Something that can answer a prompt pair
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce the answer text for a system message and a user message
    async fn generate(&self, system_message: &str, user_message: &str) -> Result<String>;
}

#[async_trait]
impl<T: AnswerGenerator + ?Sized> AnswerGenerator for Arc<T> {
    async fn generate(&self, system_message: &str, user_message: &str) -> Result<String> {
        (**self).generate(system_message, user_message).await
    }
}

/// Everything computed for a question before the language model is called
#[derive(Debug, Clone, Serialize)]
pub struct PreparedQuery {
    pub question: String,
    pub entities: RecognizedEntities,
    pub selection: Selection,
    pub subgraph_text: String,
    pub user_prompt: String,
}

impl PreparedQuery {
    /// Why the fallback sample was used, when nothing in the question was recognized
    pub fn fallback_reason(&self) -> Option<Error> {
        if self.selection.strategy == SelectionStrategy::Fallback && self.entities.is_empty() {
            Some(Error::EmptySelection)
        } else {
            None
        }
    }
}

/// A generated answer together with the context it was grounded on
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub prepared: PreparedQuery,
}

/// Build the user message around the subgraph facts and the literal question
pub fn build_user_prompt(dataset_description: &str, subgraph_text: &str, question: &str) -> String {
    format!(
        "You are an intelligent assistant that answers user queries based on structured graph data.\n\
         \n\
         The data given to you is {dataset_description}.\n\
         \n\
         Here are the known facts from the graph (relationships and values):\n\
         \n\
         {subgraph_text}\n\
         \n\
         Now answer the following question using the information above:\n\
         \"{question}\"\n"
    )
}

/// Graph-grounded question answering over a fixed fact graph
pub struct GraphRagAgent<G> {
    graph: Arc<KnowledgeGraph>,
    rollups: Arc<Rollups>,
    standing_context: String,
    dataset_description: String,
    selector: SubgraphSelector,
    generator: G,
}

impl<G> std::fmt::Debug for GraphRagAgent<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRagAgent")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("selector", &self.selector)
            .finish()
    }
}

impl<G> GraphRagAgent<G> {
    /// Create an agent with default retrieval limits and dataset description
    pub fn new(graph: Arc<KnowledgeGraph>, rollups: Arc<Rollups>, generator: G) -> Self {
        Self::with_settings(
            graph,
            rollups,
            generator,
            SubgraphSelector::default(),
            crate::config::PromptConfig::default().dataset_description,
        )
    }

    /// Create an agent using the retrieval and prompt sections of a config
    pub fn from_config(
        graph: Arc<KnowledgeGraph>,
        rollups: Arc<Rollups>,
        generator: G,
        config: &Config,
    ) -> Self {
        Self::with_settings(
            graph,
            rollups,
            generator,
            SubgraphSelector::new(SelectionConfig::from(&config.retrieval)),
            config.prompt.dataset_description.clone(),
        )
    }

    fn with_settings(
        graph: Arc<KnowledgeGraph>,
        rollups: Arc<Rollups>,
        generator: G,
        selector: SubgraphSelector,
        dataset_description: String,
    ) -> Self {
        let standing_context = render_rollup_context(&rollups, &dataset_description);
        debug!(
            context_bytes = standing_context.len(),
            "Rendered standing context"
        );
        Self {
            graph,
            rollups,
            standing_context,
            dataset_description,
            selector,
            generator,
        }
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn rollups(&self) -> &Rollups {
        &self.rollups
    }

    /// The rollup block sent as the system message with every question
    pub fn standing_context(&self) -> &str {
        &self.standing_context
    }

    /// Run retrieval for a question without calling the language model
    pub fn prepare(&self, question: &str) -> Result<PreparedQuery> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("Question is empty".to_string()));
        }

        let entities = recognize(question, &self.graph);
        let selection = self.selector.select(&self.graph, &entities);
        let subgraph = self.graph.restrict(&selection.keys);
        let subgraph_text = graph_to_text(&subgraph);
        let user_prompt = build_user_prompt(&self.dataset_description, &subgraph_text, question);

        info!(
            strategy = %selection.strategy,
            nodes = subgraph.node_count(),
            edges = subgraph.edge_count(),
            truncated = selection.truncated,
            "Prepared question context"
        );

        let prepared = PreparedQuery {
            question: question.to_string(),
            entities,
            selection,
            subgraph_text,
            user_prompt,
        };
        if let Some(reason) = prepared.fallback_reason() {
            warn!(code = reason.code(), reason = %reason, "Answering from a fallback sample of the graph");
        }
        Ok(prepared)
    }
}

impl<G: AnswerGenerator> GraphRagAgent<G> {
    /// Answer a question grounded on the graph
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let prepared = self.prepare(question)?;
        let text = self
            .generator
            .generate(&self.standing_context, &prepared.user_prompt)
            .await?;

        Ok(Answer { text, prepared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::facts::{FactRow, Metrics};
    use crate::graph::build_graph;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AnswerGenerator for RecordingGenerator {
        async fn generate(&self, system_message: &str, user_message: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system_message.to_string(), user_message.to_string()));
            Ok("42 visitors".to_string())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            Err(Error::UpstreamService("Server error (503): unavailable".to_string()))
        }
    }

    fn rows() -> Vec<FactRow> {
        vec![
            FactRow::new("01-05-2025", "North", "A1", "C1", "Alpha", Metrics::new(10, 5, 4)),
            FactRow::new("01-05-2025", "South", "B1", "C2", "Beta", Metrics::new(20, 8, 6)),
        ]
    }

    fn agent<G: AnswerGenerator>(generator: G) -> GraphRagAgent<G> {
        let rows = rows();
        GraphRagAgent::new(
            Arc::new(build_graph(&rows)),
            Arc::new(aggregate(&rows)),
            generator,
        )
    }

    #[test]
    fn test_user_prompt_layout() {
        let prompt = build_user_prompt("store visits", "Alpha has_code C1", "What is Alpha's code?");
        assert!(prompt.starts_with(
            "You are an intelligent assistant that answers user queries based on structured graph data.\n\n"
        ));
        assert!(prompt.contains("The data given to you is store visits.\n"));
        assert!(prompt.contains("(relationships and values):\n\nAlpha has_code C1\n\n"));
        assert!(prompt.ends_with("\"What is Alpha's code?\"\n"));
    }

    #[test]
    fn test_prepare_site_and_date() {
        let agent = agent(RecordingGenerator::default());
        let prepared = agent
            .prepare("How many visitors did Alpha have on 01-05-2025?")
            .unwrap();

        assert_eq!(prepared.selection.strategy, SelectionStrategy::SiteDates);
        assert!(prepared.subgraph_text.contains(
            "Alpha on 01-05-2025 had total in: 10, group count: 5, unique groups: 4"
        ));
        assert!(!prepared.subgraph_text.contains("Beta"));
        assert!(prepared.user_prompt.contains(&prepared.subgraph_text));
    }

    #[test]
    fn test_prepare_rejects_blank_question() {
        let agent = agent(RecordingGenerator::default());
        assert!(matches!(agent.prepare("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_prepare_needs_no_generator() {
        let rows = rows();
        let agent = GraphRagAgent::new(Arc::new(build_graph(&rows)), Arc::new(aggregate(&rows)), ());
        let prepared = agent.prepare("north").unwrap();
        assert_eq!(prepared.selection.strategy, SelectionStrategy::Regions);
        assert!(prepared.subgraph_text.contains("Alpha on 01-05-2025"));
    }

    #[test]
    fn test_fallback_reason_only_when_nothing_recognized() {
        let agent = agent(RecordingGenerator::default());

        let unrecognized = agent.prepare("What is the meaning of life?").unwrap();
        assert_eq!(unrecognized.selection.strategy, SelectionStrategy::Fallback);
        let reason = unrecognized.fallback_reason().unwrap();
        assert!(matches!(reason, Error::EmptySelection));
        assert_eq!(reason.code(), "E101");

        let recognized = agent.prepare("Alpha on 01-05-2025").unwrap();
        assert!(recognized.fallback_reason().is_none());

        // Recognized date with no observations falls back without the reason
        let no_match = agent.prepare("Alpha on 09-09-2031").unwrap();
        assert_eq!(no_match.selection.strategy, SelectionStrategy::Fallback);
        assert!(no_match.fallback_reason().is_none());
    }

    #[tokio::test]
    async fn test_answer_sends_standing_context_as_system_message() {
        let generator = Arc::new(RecordingGenerator::default());
        let agent = agent(generator.clone());

        let answer = agent.answer("What about Beta?").await.unwrap();
        assert_eq!(answer.text, "42 visitors");

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, agent.standing_context());
        assert!(calls[0].0.contains("SUMMARY STATISTICS:"));
        assert_eq!(calls[0].1, answer.prepared.user_prompt);
        assert!(calls[0].1.ends_with("\"What about Beta?\"\n"));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_surfaced() {
        let agent = agent(FailingGenerator);
        let err = agent.answer("What about Beta?").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamService(_)));
    }

    #[test]
    fn test_from_config_uses_description() {
        let rows = rows();
        let mut config = Config::default();
        config.prompt.dataset_description = "footfall for May 2025".to_string();
        let agent = GraphRagAgent::from_config(
            Arc::new(build_graph(&rows)),
            Arc::new(aggregate(&rows)),
            FailingGenerator,
            &config,
        );
        assert!(agent.standing_context().contains("footfall for May 2025"));
        let prepared = agent.prepare("anything at all").unwrap();
        assert!(prepared.user_prompt.contains("The data given to you is footfall for May 2025."));
    }
}
