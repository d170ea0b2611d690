use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use cogflow_core::config::{MemoryDecl, WorkflowConfig};
use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::{AgentRunner, VectorStore};
use cogflow_core::types::{extract_keys, MemorySnapshot, RunContext, RunState};

/// How many matches a base memory query asks the store for.
pub(crate) const DEFAULT_QUERY_K: usize = 5;

/// A named, scheduled wrapper around one vector-store collection.
///
/// `query` runs before selected workflow nodes and its result lands in the
/// node's memory snapshot; `update` runs after selected nodes.
/// Specializations layer extra logic on this contract.
pub trait MemoryNode: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Query the collection with a payload extracted from context/state.
    fn query(
        &self,
        keys: &[String],
        context: &RunContext,
        state: &RunState,
    ) -> BoxFuture<'_, Result<Value>>;

    /// Write a payload extracted from context/state into the collection.
    fn update(
        &self,
        keys: &[String],
        context: &RunContext,
        state: &RunState,
    ) -> BoxFuture<'_, Result<()>>;
}

impl std::fmt::Debug for dyn MemoryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNode").field("id", &self.id()).finish()
    }
}

/// Render extracted key/value pairs as one payload text block.
pub(crate) fn payload_text(pairs: &[(String, Value)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            let display = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}: {}", key, display)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Invoke a sub-agent collaborator with a synthetic payload context.
///
/// Specializations (scratchpad summarizer, persona pipeline stages) talk to
/// plain `AgentRunner`s; the payload rides in as the run context of a
/// one-off call with empty state and memory.
pub(crate) async fn call_sub_agent(agent: &Arc<dyn AgentRunner>, payload: Value) -> Result<Value> {
    let context = RunContext::from_value(payload);
    let state = RunState::new();
    let memory = MemorySnapshot::new();
    agent.run(&context, &state, &memory).await
}

/// Pull a text field out of a sub-agent output that may be a bare string or
/// an object carrying the text under `field`.
pub(crate) fn text_from_output(output: &Value, field: &str) -> Option<String> {
    match output {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get(field).and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

/// Plain memory node over one collection.
///
/// Query joins the extracted payload into one search string and returns the
/// matched documents; update stores the payload as a single timestamped
/// document.
pub struct BaseMemory {
    id: String,
    collection: String,
    store: Arc<dyn VectorStore>,
}

impl BaseMemory {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            store,
        }
    }
}

impl MemoryNode for BaseMemory {
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

        Box::pin(async move {
            if payload.is_empty() {
                return Ok(Value::Array(vec![]));
            }

            let result = self
                .store
                .query(&self.collection, &payload, DEFAULT_QUERY_K)
                .await?;

            debug!(memory_id = %self.id, matches = result.len(), "Memory query");
            Ok(Value::Array(
                result.documents.into_iter().map(Value::String).collect(),
            ))
        })
    }

    fn update(
        &self,
        keys: &[String],
        context: &RunContext,
        state: &RunState,
    ) -> BoxFuture<'_, Result<()>> {
        let payload = payload_text(&extract_keys(keys, context, state));

        Box::pin(async move {
            if payload.is_empty() {
                return Ok(());
            }

            let id = uuid::Uuid::new_v4().to_string();
            let metadata = serde_json::json!({
                "created_at": chrono::Utc::now().to_rfc3339(),
            });
            self.store
                .save(&self.collection, &[payload], &[id], &[metadata])
                .await?;

            debug!(memory_id = %self.id, "Memory updated");
            Ok(())
        })
    }
}

/// Builds a memory node from its declaration, the workflow document, and
/// the collection's vector store.
pub type MemoryNodeCtor =
    Arc<dyn Fn(&WorkflowConfig, &MemoryDecl, Arc<dyn VectorStore>) -> Result<Arc<dyn MemoryNode>> + Send + Sync>;

/// Maps memory type tags to constructors.
///
/// Populated at startup; unknown tags are a configuration error rather than
/// a runtime lookup failure. The absent tag and `"base"` build `BaseMemory`.
pub struct MemoryTypeRegistry {
    ctors: HashMap<String, MemoryNodeCtor>,
}

impl MemoryTypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };
        registry.register("base", |_, decl, store| {
            Ok(Arc::new(BaseMemory::new(&decl.id, decl.collection(), store)) as Arc<dyn MemoryNode>)
        });
        registry
    }

    /// Register a constructor for a memory type tag.
    pub fn register<F>(&mut self, type_tag: impl Into<String>, ctor: F)
    where
        F: Fn(&WorkflowConfig, &MemoryDecl, Arc<dyn VectorStore>) -> Result<Arc<dyn MemoryNode>>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(type_tag.into(), Arc::new(ctor));
    }

    /// Build the memory node declared by `decl`.
    pub fn build(
        &self,
        config: &WorkflowConfig,
        decl: &MemoryDecl,
        store: Arc<dyn VectorStore>,
    ) -> Result<Arc<dyn MemoryNode>> {
        let tag = decl.memory_type.as_deref().unwrap_or("base");
        let ctor = self.ctors.get(tag).ok_or_else(|| {
            CogError::Config(format!(
                "unknown memory type '{}' for memory node '{}'",
                tag, decl.id
            ))
        })?;
        ctor(config, decl, store)
    }
}

impl Default for MemoryTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
