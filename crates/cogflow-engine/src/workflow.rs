use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use cogflow_core::config::WorkflowConfig;
use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::AgentRunner;
use cogflow_core::types::RunStatus;
use cogflow_memory::{
    get_or_create, ChatHistoryMemory, MemoryManager, MemoryTypeRegistry, ScheduledMemory,
    CHAT_HISTORY_ID,
};

use crate::cog::Cog;
use crate::graph::FlowGraph;
use crate::registry::AgentRegistry;

/// An assembled workflow, ready to run.
///
/// Wires a validated document into the engine: agents through the agent
/// registry, memory nodes through the type registry over the workflow's
/// storage partition (keyed by workflow name), the implicit chat-history
/// slot when enabled, and the flow graph into a `Cog`.
pub struct Workflow {
    name: String,
    cog: Cog,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow").field("name", &self.name).finish()
    }
}

impl Workflow {
    pub fn from_config(
        config: &WorkflowConfig,
        agent_registry: &AgentRegistry,
        memory_types: &MemoryTypeRegistry,
    ) -> Result<Self> {
        let mut agents: HashMap<String, Arc<dyn AgentRunner>> = HashMap::new();
        for decl in &config.agents {
            if agents.contains_key(&decl.id) {
                return Err(CogError::Config(format!(
                    "duplicate agent id '{}'",
                    decl.id
                )));
            }
            agents.insert(decl.id.clone(), agent_registry.build(decl)?);
        }

        let handle = get_or_create(&config.name)?;
        let store = handle.store();

        let mut scheduled = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for decl in &config.memory {
            if !seen.insert(decl.id.clone()) {
                return Err(CogError::Config(format!(
                    "duplicate memory node id '{}'",
                    decl.id
                )));
            }
            for node_id in decl.query_before.iter().chain(decl.update_after.iter()) {
                if !agents.contains_key(node_id) {
                    return Err(CogError::Config(format!(
                        "memory node '{}' schedules against undeclared node '{}'",
                        decl.id, node_id
                    )));
                }
            }
            let node = memory_types.build(config, decl, store.clone())?;
            scheduled.push(ScheduledMemory {
                decl: decl.clone(),
                node,
            });
        }

        let chat = config.chat_memory_enabled.then(|| {
            ChatHistoryMemory::new(
                store,
                CHAT_HISTORY_ID,
                config.chat_history_max_results,
                config.chat_history_max_retrieval,
            )
        });

        let memory = MemoryManager::new(scheduled, chat)?;
        let graph = FlowGraph::new(config.flow.clone(), agents.keys().cloned());
        let cog = Cog::new(graph, agents, memory)?;

        info!(workflow = %config.name, "Workflow assembled");
        Ok(Self {
            name: config.name.clone(),
            cog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RunStatus {
        self.cog.status()
    }

    /// Ordered list of nodes visited by the most recent run.
    pub fn visited(&self) -> &[String] {
        self.cog.visited()
    }

    /// Execute one run with the given external input.
    pub async fn run(&mut self, input: Value) -> Result<Value> {
        self.cog.run(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogflow_core::types::{MemorySnapshot, RunContext, RunState};
    use futures::future::BoxFuture;
    use serde_json::json;

    struct EchoAgent {
        id: String,
    }

    impl AgentRunner for EchoAgent {
        fn run(
            &self,
            _context: &RunContext,
            _state: &RunState,
            _memory: &MemorySnapshot,
        ) -> BoxFuture<'_, Result<Value>> {
            let id = self.id.clone();
            Box::pin(async move { Ok(json!({ "text": format!("{} ran", id) })) })
        }
    }

    fn echo_registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register("echo", |decl| {
            Ok(Arc::new(EchoAgent {
                id: decl.id.clone(),
            }) as Arc<dyn AgentRunner>)
        });
        registry
    }

    fn parse(toml_content: &str) -> WorkflowConfig {
        toml::from_str(toml_content).expect("parse workflow")
    }

    #[tokio::test]
    async fn test_assemble_and_run_document() {
        let config = parse(
            r#"
name = "wf_assemble"
chat_memory_enabled = false

[[agents]]
id = "analyze"
type = "echo"

[[agents]]
id = "respond"
type = "echo"

[flow]
start = "analyze"

[flow.transitions.analyze]
next = "respond"

[flow.transitions.respond]
end = "respond.text"
"#,
        );

        let mut workflow =
            Workflow::from_config(&config, &echo_registry(), &MemoryTypeRegistry::new()).unwrap();
        assert_eq!(workflow.name(), "wf_assemble");
        assert_eq!(workflow.status(), RunStatus::Pending);

        let result = workflow.run(json!("go")).await.unwrap();
        assert_eq!(result, json!("respond ran"));
        assert_eq!(workflow.visited(), ["analyze", "respond"]);
    }

    #[test]
    fn test_unknown_agent_type_rejected() {
        let config = parse(
            r#"
name = "wf_unknown_agent"

[[agents]]
id = "analyze"
type = "mystery"

[flow]
start = "analyze"

[flow.transitions.analyze]
end = true
"#,
        );

        let err = Workflow::from_config(&config, &echo_registry(), &MemoryTypeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, CogError::Config(_)));
    }

    #[test]
    fn test_memory_schedule_against_unknown_node_rejected() {
        let config = parse(
            r#"
name = "wf_bad_schedule"

[[agents]]
id = "analyze"
type = "echo"

[[memory]]
id = "notes"
query_before = ["ghost"]

[flow]
start = "analyze"

[flow.transitions.analyze]
end = true
"#,
        );

        let err = Workflow::from_config(&config, &echo_registry(), &MemoryTypeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, CogError::Config(_)));
    }

    #[test]
    fn test_duplicate_memory_id_rejected() {
        let config = parse(
            r#"
name = "wf_dup_memory"

[[agents]]
id = "analyze"
type = "echo"

[[memory]]
id = "notes"

[[memory]]
id = "notes"

[flow]
start = "analyze"

[flow.transitions.analyze]
end = true
"#,
        );

        let err = Workflow::from_config(&config, &echo_registry(), &MemoryTypeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, CogError::Config(_)));
    }
}
