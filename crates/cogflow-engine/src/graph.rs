use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use cogflow_core::config::{EndSpec, FlowConfig, TransitionConfig};
use cogflow_core::error::{CogError, Result};
use cogflow_core::types::{normalize_decision, RunState};

/// Outcome of resolving one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Continue with this node.
    Next(String),
    /// The run is complete with this return value.
    End(Value),
}

/// The node/transition map of one workflow.
///
/// Validates references at load time and resolves the next node from a
/// node's output, applying decision normalization, fallback semantics, and
/// loop guards.
pub struct FlowGraph {
    flow: FlowConfig,
    nodes: HashSet<String>,
}

impl FlowGraph {
    pub fn new(flow: FlowConfig, node_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            flow,
            nodes: node_ids.into_iter().collect(),
        }
    }

    pub fn start_id(&self) -> &str {
        &self.flow.start
    }

    /// Check every reference in the transition table.
    ///
    /// Undeclared start node, undeclared transition source or target, and
    /// malformed transition shapes are all fatal configuration errors.
    pub fn validate(&self) -> Result<()> {
        if !self.nodes.contains(&self.flow.start) {
            return Err(CogError::Config(format!(
                "start node '{}' is not a declared node",
                self.flow.start
            )));
        }

        for (source, transition) in &self.flow.transitions {
            if !self.nodes.contains(source) {
                return Err(CogError::Config(format!(
                    "transition declared for undeclared node '{}'",
                    source
                )));
            }
            self.validate_shape(source, transition)?;

            let targets = transition
                .next
                .iter()
                .chain(transition.branches.values())
                .chain(transition.fallback.iter());
            for target in targets {
                if !self.nodes.contains(target) {
                    return Err(CogError::Config(format!(
                        "transition from '{}' references undeclared node '{}'",
                        source, target
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_shape(&self, source: &str, transition: &TransitionConfig) -> Result<()> {
        let kinds = [
            transition.next.is_some(),
            transition.decision_key.is_some(),
            transition.end.is_some(),
        ];
        if kinds.iter().filter(|k| **k).count() != 1 {
            return Err(CogError::Config(format!(
                "transition from '{}' must declare exactly one of next, decision_key, or end",
                source
            )));
        }
        if transition.decision_key.is_some() && transition.branches.is_empty() {
            return Err(CogError::Config(format!(
                "decision transition from '{}' declares no branches",
                source
            )));
        }
        if matches!(transition.end, Some(EndSpec::RawOutput(false))) {
            return Err(CogError::Config(format!(
                "transition from '{}' declares end = false",
                source
            )));
        }
        Ok(())
    }

    /// Resolve the transition out of `current` given its output.
    ///
    /// `visits` is the source node's visit counter, already incremented for
    /// the visit that produced `output`.
    pub fn resolve_next(
        &self,
        current: &str,
        output: &Value,
        state: &RunState,
        visits: u32,
    ) -> Result<Step> {
        let transition = self.flow.transitions.get(current).ok_or_else(|| {
            CogError::Config(format!("no transition declared for node '{}'", current))
        })?;

        if let Some(end) = &transition.end {
            let value = match end {
                EndSpec::RawOutput(_) => output.clone(),
                EndSpec::StatePath(path) => {
                    state.resolve_path(path).cloned().unwrap_or(Value::Null)
                }
            };
            return Ok(Step::End(value));
        }

        if let Some(next) = &transition.next {
            return Ok(Step::Next(next.clone()));
        }

        self.resolve_decision(current, transition, output, visits)
    }

    fn resolve_decision(
        &self,
        current: &str,
        transition: &TransitionConfig,
        output: &Value,
        visits: u32,
    ) -> Result<Step> {
        let fallback = transition.fallback.as_deref();

        // Loop guard wins over the decision value
        if let Some(max_visits) = transition.max_visits {
            if visits > max_visits {
                return match fallback {
                    Some(target) => {
                        warn!(
                            node_id = %current,
                            visits,
                            max_visits,
                            "Visit limit exceeded, forcing fallback"
                        );
                        Ok(Step::Next(target.to_string()))
                    }
                    None => Err(CogError::LoopLimitExceeded {
                        node: current.to_string(),
                        max_visits,
                    }),
                };
            }
        }

        let Some(key) = transition.decision_key.as_deref() else {
            return Err(CogError::Config(format!(
                "transition from '{}' declares no next, decision_key, or end",
                current
            )));
        };

        let Some(value) = output.get(key) else {
            return self.fallback_or(current, fallback, format!("decision key '{}' missing from output", key));
        };

        let Some(normalized) = normalize_decision(value) else {
            return self.fallback_or(
                current,
                fallback,
                format!("decision value {} is not comparable", value),
            );
        };

        let matched = transition
            .branches
            .iter()
            .find(|(label, _)| label.trim().to_lowercase() == normalized)
            .map(|(_, target)| target.clone());

        match matched {
            Some(target) => {
                debug!(node_id = %current, branch = %normalized, to = %target, "Decision resolved");
                Ok(Step::Next(target))
            }
            None => self.fallback_or(
                current,
                fallback,
                format!("no branch matches '{}'", normalized),
            ),
        }
    }

    fn fallback_or(&self, current: &str, fallback: Option<&str>, reason: String) -> Result<Step> {
        match fallback {
            Some(target) => {
                debug!(node_id = %current, reason = %reason, to = %target, "Decision fell back");
                Ok(Step::Next(target.to_string()))
            }
            None => Err(CogError::UnresolvedDecision {
                node: current.to_string(),
                reason,
            }),
        }
    }
}
