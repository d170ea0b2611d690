use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, warn};

use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::{AgentRunner, VectorStore};
use cogflow_core::types::{extract_keys, RunContext, RunState};

use crate::node::{call_sub_agent, payload_text, text_from_output, BaseMemory, MemoryNode, DEFAULT_QUERY_K};

/// Default character cap on the synthesized narrative.
const DEFAULT_NARRATIVE_CAP: usize = 2000;

/// The three sub-agent collaborators the persona pipeline delegates to.
#[derive(Clone)]
pub struct PersonaAgents {
    /// Produces 1-3 semantic search strings for a payload.
    pub retrieval: Arc<dyn AgentRunner>,
    /// Combines persona data and facts into one narrative.
    pub synthesis: Arc<dyn AgentRunner>,
    /// Decides add/update/none for candidate new information.
    pub decision: Arc<dyn AgentRunner>,
}

/// One retrieved persona fact.
#[derive(Debug, Clone)]
struct Fact {
    id: String,
    text: String,
    metadata: Value,
}

impl Fact {
    fn superseded(&self) -> bool {
        self.metadata
            .get("superseded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// What the update-decision agent chose.
enum UpdateDecision {
    Add,
    Update { supersedes: Vec<String> },
    None,
}

/// Identity memory with superseding fact lifecycle.
///
/// Query synthesizes a narrative from static persona data plus retrieved
/// facts; update routes candidate information through an add/update/none
/// decision, flagging replaced facts as superseded instead of deleting
/// them. Any pipeline failure falls back to base memory semantics for that
/// call and never fails the run.
pub struct PersonaMemory {
    id: String,
    collection: String,
    store: Arc<dyn VectorStore>,
    persona: Value,
    agents: PersonaAgents,
    narrative_cap: usize,
    base: BaseMemory,
}

impl PersonaMemory {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        store: Arc<dyn VectorStore>,
        persona: Value,
        agents: PersonaAgents,
    ) -> Self {
        let id = id.into();
        let collection = collection.into();
        Self {
            base: BaseMemory::new(&id, &collection, store.clone()),
            id,
            collection,
            store,
            persona,
            agents,
            narrative_cap: DEFAULT_NARRATIVE_CAP,
        }
    }

    pub fn with_narrative_cap(mut self, cap: usize) -> Self {
        self.narrative_cap = cap;
        self
    }

    fn specialization_err(&self, message: impl Into<String>) -> CogError {
        CogError::MemorySpecialization {
            memory: self.id.clone(),
            message: message.into(),
        }
    }

    /// Stage 1: ask the retrieval agent for semantic search strings.
    async fn search_strings(&self, payload: &str) -> Result<Vec<String>> {
        let output = call_sub_agent(
            &self.agents.retrieval,
            json!({
                "task": "fact_search_strings",
                "text": payload,
                "persona": self.persona,
            }),
        )
        .await?;

        let raw = match &output {
            Value::Array(items) => items.clone(),
            Value::Object(map) => map
                .get("queries")
                .and_then(|v| v.as_array())
                .cloned()
                .ok_or_else(|| self.specialization_err("retrieval output missing 'queries'"))?,
            _ => return Err(self.specialization_err("retrieval output not a string list")),
        };

        let strings: Vec<String> = raw
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .take(3)
            .collect();

        if strings.is_empty() {
            return Err(self.specialization_err("retrieval produced no search strings"));
        }
        Ok(strings)
    }

    /// Stage 2: run each search string, merge and de-duplicate by fact id.
    async fn search_facts(&self, searches: &[String]) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = Vec::new();
        for search in searches {
            let result = self
                .store
                .query(&self.collection, search, DEFAULT_QUERY_K)
                .await?;
            for (id, doc, meta) in result.iter() {
                if facts.iter().any(|f| f.id == id) {
                    continue;
                }
                facts.push(Fact {
                    id: id.to_string(),
                    text: doc.to_string(),
                    metadata: meta.clone(),
                });
            }
        }
        Ok(facts)
    }

    /// Stage 3 (query path): synthesize the narrative.
    async fn synthesize(&self, facts: &[Fact]) -> Result<String> {
        let narrative = if facts.is_empty() {
            // Static-only fallback when retrieval finds nothing
            serde_json::to_string(&self.persona)?
        } else {
            let fact_texts: Vec<&str> = facts.iter().map(|f| f.text.as_str()).collect();
            let output = call_sub_agent(
                &self.agents.synthesis,
                json!({
                    "task": "persona_narrative",
                    "persona": self.persona,
                    "facts": fact_texts,
                }),
            )
            .await?;
            text_from_output(&output, "narrative")
                .ok_or_else(|| self.specialization_err("synthesis output missing narrative"))?
        };

        Ok(truncate_chars(&narrative, self.narrative_cap))
    }

    /// Stage 4 (update path): ask the decision agent what to do.
    async fn decide(&self, candidate: &str, facts: &[Fact]) -> Result<UpdateDecision> {
        let fact_view: Vec<Value> = facts
            .iter()
            .map(|f| json!({"id": f.id, "text": f.text}))
            .collect();
        let output = call_sub_agent(
            &self.agents.decision,
            json!({
                "task": "persona_update_decision",
                "candidate": candidate,
                "facts": fact_view,
            }),
        )
        .await?;

        let action = output
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| self.specialization_err("decision output missing 'action'"))?;

        match action {
            "add" => Ok(UpdateDecision::Add),
            "update" => {
                let supersedes = output
                    .get("supersedes")
                    .and_then(|v| v.as_array())
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|v| v.as_str())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(UpdateDecision::Update { supersedes })
            }
            "none" => Ok(UpdateDecision::None),
            other => Err(self.specialization_err(format!("unknown decision action '{}'", other))),
        }
    }

    async fn save_fact(&self, text: &str, supersedes: &[String]) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let metadata = json!({
            "superseded": false,
            "supersedes": supersedes,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        self.store
            .save(
                &self.collection,
                &[text.to_string()],
                &[id.clone()],
                &[metadata],
            )
            .await?;
        Ok(id)
    }

    /// Flag replaced facts without deleting them (audit trail).
    async fn mark_superseded(&self, facts: &[Fact], ids: &[String]) -> Result<()> {
        for fact in facts.iter().filter(|f| ids.contains(&f.id)) {
            let mut metadata = fact.metadata.clone();
            if !metadata.is_object() {
                metadata = json!({});
            }
            metadata["superseded"] = json!(true);
            self.store
                .save(
                    &self.collection,
                    &[fact.text.clone()],
                    &[fact.id.clone()],
                    &[metadata],
                )
                .await?;
        }
        Ok(())
    }

    async fn query_pipeline(&self, payload: &str) -> Result<String> {
        let searches = self.search_strings(payload).await?;
        let facts = self.search_facts(&searches).await?;
        let active: Vec<Fact> = facts.into_iter().filter(|f| !f.superseded()).collect();
        debug!(memory_id = %self.id, active_facts = active.len(), "Persona query");
        self.synthesize(&active).await
    }

    async fn update_pipeline(&self, payload: &str) -> Result<()> {
        let searches = self.search_strings(payload).await?;
        let facts = self.search_facts(&searches).await?;
        let active: Vec<Fact> = facts.into_iter().filter(|f| !f.superseded()).collect();

        match self.decide(payload, &active).await? {
            UpdateDecision::Add => {
                let id = self.save_fact(payload, &[]).await?;
                debug!(memory_id = %self.id, fact_id = %id, "Persona fact added");
            }
            UpdateDecision::Update { supersedes } => {
                let id = self.save_fact(payload, &supersedes).await?;
                self.mark_superseded(&active, &supersedes).await?;
                debug!(
                    memory_id = %self.id,
                    fact_id = %id,
                    replaced = supersedes.len(),
                    "Persona fact updated"
                );
            }
            UpdateDecision::None => {
                debug!(memory_id = %self.id, "Persona update skipped");
            }
        }
        Ok(())
    }
}

/// Truncate to a character cap without splitting a code point.
fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

impl MemoryNode for PersonaMemory {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(
        &self,
        keys: &[String],
        context: &RunContext,
        state: &RunState,
    ) -> BoxFuture<'_, Result<Value>> {
        let payload = payload_text(&extract_keys(keys, context, state));
        let keys = keys.to_vec();
        let context = context.clone();
        let state = state.clone();

        Box::pin(async move {
            match self.query_pipeline(&payload).await {
                Ok(narrative) => Ok(Value::String(narrative)),
                Err(e) => {
                    warn!(memory_id = %self.id, error = %e, "Persona query degraded to base memory");
                    self.base.query(&keys, &context, &state).await
                }
            }
        })
    }

    fn update(
        &self,
        keys: &[String],
        context: &RunContext,
        state: &RunState,
    ) -> BoxFuture<'_, Result<()>> {
        let payload = payload_text(&extract_keys(keys, context, state));
        let keys = keys.to_vec();
        let context = context.clone();
        let state = state.clone();

        Box::pin(async move {
            if payload.is_empty() {
                return Ok(());
            }

            match self.update_pipeline(&payload).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!(memory_id = %self.id, error = %e, "Persona update degraded to base memory");
                    self.base.update(&keys, &context, &state).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EphemeralStore;
    use cogflow_core::types::MemorySnapshot;

    /// Sub-agent stub dispatching on the payload's `task` field.
    struct PipelineStub {
        decision: Value,
        broken_retrieval: bool,
    }

    impl AgentRunner for PipelineStub {
        fn run(
            &self,
            context: &RunContext,
            _state: &RunState,
            _memory: &MemorySnapshot,
        ) -> BoxFuture<'_, Result<Value>> {
            let task = context.get_str("task").unwrap_or_default().to_string();
            let facts = context.get("facts").cloned();
            let decision = self.decision.clone();
            let broken = self.broken_retrieval;

            Box::pin(async move {
                match task.as_str() {
                    "fact_search_strings" => {
                        if broken {
                            Ok(json!("not a list"))
                        } else {
                            Ok(json!(["favorite color", "preferences"]))
                        }
                    }
                    "persona_narrative" => {
                        let facts = facts.unwrap_or(json!([]));
                        let texts: Vec<&str> = facts
                            .as_array()
                            .unwrap()
                            .iter()
                            .filter_map(|v| v.as_str())
                            .collect();
                        Ok(json!({"narrative": format!("Sam. Known: {}", texts.join("; "))}))
                    }
                    "persona_update_decision" => Ok(decision),
                    other => panic!("unexpected task {}", other),
                }
            })
        }
    }

    fn persona_memory(decision: Value, broken_retrieval: bool) -> (PersonaMemory, Arc<EphemeralStore>) {
        let store = Arc::new(EphemeralStore::new());
        let stub = Arc::new(PipelineStub {
            decision,
            broken_retrieval,
        }) as Arc<dyn AgentRunner>;
        let memory = PersonaMemory::new(
            "persona",
            "persona_facts",
            store.clone(),
            json!({"name": "Sam", "tone": "warm"}),
            PersonaAgents {
                retrieval: stub.clone(),
                synthesis: stub.clone(),
                decision: stub,
            },
        );
        (memory, store)
    }

    async fn seed_fact(store: &Arc<EphemeralStore>, id: &str, text: &str, superseded: bool) {
        store
            .save(
                "persona_facts",
                &[text.to_string()],
                &[id.to_string()],
                &[json!({"superseded": superseded, "supersedes": []})],
            )
            .await
            .unwrap();
    }

    fn keyed(payload: &str) -> (Vec<String>, RunContext, RunState) {
        (
            vec!["input".to_string()],
            RunContext::from_value(json!({ "input": payload })),
            RunState::new(),
        )
    }

    #[tokio::test]
    async fn test_query_synthesizes_narrative_from_facts() {
        let (memory, store) = persona_memory(json!({"action": "none"}), false);
        seed_fact(&store, "f1", "favorite color is green", false).await;

        let (keys, ctx, state) = keyed("what are my preferences");
        let result = memory.query(&keys, &ctx, &state).await.unwrap();
        let narrative = result.as_str().unwrap();
        assert!(narrative.starts_with("Sam. Known:"));
        assert!(narrative.contains("green"));
    }

    #[tokio::test]
    async fn test_query_static_only_without_facts() {
        let (memory, _) = persona_memory(json!({"action": "none"}), false);

        let (keys, ctx, state) = keyed("tell me about preferences");
        let result = memory.query(&keys, &ctx, &state).await.unwrap();
        // No facts stored: static persona data only
        assert!(result.as_str().unwrap().contains("Sam"));
    }

    #[tokio::test]
    async fn test_update_add_stores_fact() {
        let (memory, store) = persona_memory(json!({"action": "add"}), false);

        let (keys, ctx, state) = keyed("favorite color is blue");
        memory.update(&keys, &ctx, &state).await.unwrap();

        let all = store.recent("persona_facts", 0).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.metadatas[0]["superseded"], json!(false));
        assert_eq!(all.metadatas[0]["supersedes"], json!([]));
    }

    #[tokio::test]
    async fn test_update_supersedes_replaced_fact() {
        let (memory, store) = persona_memory(
            json!({"action": "update", "supersedes": ["f1"]}),
            false,
        );
        seed_fact(&store, "f1", "favorite color is green", false).await;

        let (keys, ctx, state) = keyed("favorite color is now blue");
        memory.update(&keys, &ctx, &state).await.unwrap();

        let all = store.recent("persona_facts", 0).await.unwrap();
        assert_eq!(all.len(), 2);

        let old = all.iter().find(|(id, _, _)| *id == "f1").unwrap();
        assert_eq!(old.2["superseded"], json!(true));
        assert_eq!(old.1, "favorite color is green");

        let new = all.iter().find(|(id, _, _)| *id != "f1").unwrap();
        assert_eq!(new.2["superseded"], json!(false));
        assert_eq!(new.2["supersedes"], json!(["f1"]));
    }

    #[tokio::test]
    async fn test_superseded_fact_excluded_from_narrative() {
        let (memory, store) = persona_memory(json!({"action": "none"}), false);
        seed_fact(&store, "f1", "favorite color is green", true).await;
        seed_fact(&store, "f2", "favorite color is blue", false).await;

        let (keys, ctx, state) = keyed("what is my favorite color");
        let narrative = memory.query(&keys, &ctx, &state).await.unwrap();
        let narrative = narrative.as_str().unwrap();
        assert!(narrative.contains("blue"));
        assert!(!narrative.contains("green"));

        // Still physically retained and retrievable
        let all = store.recent("persona_facts", 0).await.unwrap();
        assert!(all.iter().any(|(id, _, _)| id == "f1"));
    }

    #[tokio::test]
    async fn test_update_none_writes_nothing() {
        let (memory, store) = persona_memory(json!({"action": "none"}), false);

        let (keys, ctx, state) = keyed("nothing new here");
        memory.update(&keys, &ctx, &state).await.unwrap();
        assert!(store.recent("persona_facts", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broken_pipeline_falls_back_to_base() {
        let (memory, store) = persona_memory(json!({"action": "add"}), true);

        let (keys, ctx, state) = keyed("likes hiking in autumn");
        // Update degrades to a plain save, never an error
        memory.update(&keys, &ctx, &state).await.unwrap();
        let all = store.recent("persona_facts", 0).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.documents[0].contains("hiking"));

        // Query degrades to plain document matches
        let result = memory.query(&keys, &ctx, &state).await.unwrap();
        assert!(result.is_array());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
