use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::AgentRunner;
use cogflow_core::types::{RunContext, RunState, RunStatus};
use cogflow_memory::MemoryManager;

use crate::graph::{FlowGraph, Step};

/// Run coordinator — drives one workflow from start node to terminal
/// transition.
///
/// Owns the flow graph, the per-node agent collaborators, and the memory
/// manager. Each `run` builds a fresh run context and run state, resets the
/// visit counters, and loops: increment visit counter, memory `before`,
/// agent call, record output, memory `after`, resolve next step. Any
/// unresolved decision, exceeded loop limit without fallback, or agent
/// failure aborts the run.
pub struct Cog {
    graph: FlowGraph,
    agents: HashMap<String, Arc<dyn AgentRunner>>,
    memory: MemoryManager,
    status: RunStatus,
    visited: Vec<String>,
}

impl Cog {
    pub fn new(
        graph: FlowGraph,
        agents: HashMap<String, Arc<dyn AgentRunner>>,
        memory: MemoryManager,
    ) -> Result<Self> {
        graph.validate()?;
        Ok(Self {
            graph,
            agents,
            memory,
            status: RunStatus::Pending,
            visited: Vec::new(),
        })
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Ordered list of nodes visited by the most recent run.
    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    /// Execute the workflow with the given external input.
    pub async fn run(&mut self, input: Value) -> Result<Value> {
        self.status = RunStatus::Running;
        self.visited.clear();

        let context = RunContext::from_value(input);
        let mut state = RunState::new();

        match self.drive(&context, &mut state).await {
            Ok(result) => {
                self.status = RunStatus::Completed;
                info!(nodes_visited = self.visited.len(), "Run completed");
                Ok(result)
            }
            Err(e) => {
                self.status = RunStatus::Failed;
                error!(error = %e, "Run failed");
                Err(e)
            }
        }
    }

    async fn drive(&mut self, context: &RunContext, state: &mut RunState) -> Result<Value> {
        let mut visits: HashMap<String, u32> = HashMap::new();
        let mut current = self.graph.start_id().to_string();

        loop {
            let agent = self
                .agents
                .get(&current)
                .ok_or_else(|| {
                    CogError::Config(format!("no agent registered for node '{}'", current))
                })?
                .clone();

            let visit = {
                let counter = visits.entry(current.clone()).or_insert(0);
                *counter += 1;
                *counter
            };
            self.visited.push(current.clone());
            info!(node_id = %current, visit, "Executing node");

            let snapshot = self.memory.before(&current, context, state).await;

            let output = agent
                .run(context, state, &snapshot)
                .await
                .map_err(|e| CogError::AgentExecution {
                    node: current.clone(),
                    message: e.to_string(),
                })?;

            state.record(&current, output.clone());
            self.memory.after(&current, context, state).await;

            match self.graph.resolve_next(&current, &output, state, visit)? {
                Step::Next(next) => {
                    debug!(from = %current, to = %next, "Transition resolved");
                    current = next;
                }
                Step::End(result) => {
                    debug!(node_id = %current, "Terminal transition reached");
                    return Ok(result);
                }
            }
        }
    }
}
