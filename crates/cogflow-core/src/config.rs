use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level declarative workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name (doubles as the storage partition id).
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Static persona data made available to persona memory nodes.
    #[serde(default)]
    pub persona: Option<Value>,
    /// Whether the implicit chat-history memory is active (default: true).
    #[serde(default = "default_true")]
    pub chat_memory_enabled: bool,
    /// Cap on the recency slice of chat history (0 = unbounded).
    #[serde(default = "default_chat_cap")]
    pub chat_history_max_results: usize,
    /// Cap on the semantically-retrieved slice of chat history (0 = disabled).
    #[serde(default = "default_chat_cap")]
    pub chat_history_max_retrieval: usize,
    #[serde(default)]
    pub agents: Vec<AgentDecl>,
    #[serde(default)]
    pub memory: Vec<MemoryDecl>,
    pub flow: FlowConfig,
}

fn default_true() -> bool {
    true
}

fn default_chat_cap() -> usize {
    20
}

/// One workflow node, backed by an external agent implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecl {
    /// Unique node id within the workflow.
    pub id: String,
    /// Agent type tag, resolved through the agent registry.
    #[serde(rename = "type")]
    pub agent_type: String,
}

/// One declared memory node and its schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDecl {
    /// Unique memory node id within the workflow.
    pub id: String,
    /// Specialization type tag (absent = base memory).
    #[serde(default, rename = "type")]
    pub memory_type: Option<String>,
    /// Target collection (defaults to the memory node id).
    #[serde(default)]
    pub collection_id: Option<String>,
    /// Node ids before whose execution this memory is queried.
    #[serde(default)]
    pub query_before: Vec<String>,
    /// Node ids after whose execution this memory is updated.
    #[serde(default)]
    pub update_after: Vec<String>,
    /// Context/state keys extracted as the query payload.
    #[serde(default)]
    pub query_keys: Vec<String>,
    /// Context/state keys extracted as the update payload.
    #[serde(default)]
    pub update_keys: Vec<String>,
}

impl MemoryDecl {
    /// The collection this memory node targets.
    pub fn collection(&self) -> &str {
        self.collection_id.as_deref().unwrap_or(&self.id)
    }
}

/// The node/transition map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Start node id.
    pub start: String,
    /// Transition declared for each source node.
    pub transitions: HashMap<String, TransitionConfig>,
}

/// Transition rule for one source node.
///
/// Exactly one kind must be declared: `next` (direct), `decision_key` +
/// `branches` (decision), or `end` (terminal). Shape is checked by
/// `FlowGraph::validate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Direct transition target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Field in the node's output used to pick a branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_key: Option<String>,
    /// Normalized branch label -> target node id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub branches: HashMap<String, String>,
    /// Target when the decision can't be resolved or the loop limit is hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Visit limit for the source node before forcing the fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u32>,
    /// Terminal marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EndSpec>,
}

/// Terminal transition: return the raw node output (`end = true`) or a
/// dot-path slice of the run state (`end = "a.b.c"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndSpec {
    RawOutput(bool),
    StatePath(String),
}
