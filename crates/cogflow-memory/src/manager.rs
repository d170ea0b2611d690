use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use cogflow_core::config::MemoryDecl;
use cogflow_core::error::{CogError, Result};
use cogflow_core::types::{MemorySnapshot, RunContext, RunState};

use crate::chat_history::{ChatHistoryMemory, CHAT_HISTORY_ID};
use crate::node::MemoryNode;

/// A declared memory node together with its schedule.
pub struct ScheduledMemory {
    pub decl: MemoryDecl,
    pub node: Arc<dyn MemoryNode>,
}

/// Owns a workflow's memory nodes and times their queries/updates around
/// node execution.
///
/// Declared nodes run in declaration order. The chat-history slot is
/// reserved: always present in the snapshot when enabled, toggle-only, and
/// never user-declarable. Memory failures degrade (warning plus a null
/// snapshot entry) instead of aborting the run.
pub struct MemoryManager {
    nodes: Vec<ScheduledMemory>,
    chat: Option<ChatHistoryMemory>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("nodes", &self.nodes.len())
            .field("chat", &self.chat.is_some())
            .finish()
    }
}

impl MemoryManager {
    pub fn new(nodes: Vec<ScheduledMemory>, chat: Option<ChatHistoryMemory>) -> Result<Self> {
        for scheduled in &nodes {
            if scheduled.decl.id == CHAT_HISTORY_ID {
                return Err(CogError::Config(format!(
                    "memory node id '{}' is reserved for the implicit chat history",
                    CHAT_HISTORY_ID
                )));
            }
        }
        Ok(Self { nodes, chat })
    }

    /// Run all pre-queries for a node and assemble its memory snapshot.
    pub async fn before(
        &self,
        node_id: &str,
        context: &RunContext,
        state: &RunState,
    ) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot::new();

        for scheduled in self.scheduled_for(node_id, |d| &d.query_before) {
            let entry = match scheduled
                .node
                .query(&scheduled.decl.query_keys, context, state)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        memory_id = %scheduled.decl.id,
                        node_id = %node_id,
                        error = %e,
                        "Memory query failed, degrading to empty entry"
                    );
                    Value::Null
                }
            };
            snapshot.insert(scheduled.decl.id.clone(), entry);
        }

        if let Some(chat) = &self.chat {
            match chat.snapshot(context).await {
                Ok(entry) => snapshot.insert(CHAT_HISTORY_ID, entry),
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "Chat history snapshot failed");
                    snapshot.insert(CHAT_HISTORY_ID, Value::Null);
                }
            }
        }

        debug!(node_id = %node_id, entries = snapshot.entries().len(), "Memory snapshot assembled");
        snapshot
    }

    /// Run all post-updates for a node. The implicit chat history records
    /// the latest context/output pair whenever enabled.
    pub async fn after(&self, node_id: &str, context: &RunContext, state: &RunState) {
        for scheduled in self.scheduled_for(node_id, |d| &d.update_after) {
            if let Err(e) = scheduled
                .node
                .update(&scheduled.decl.update_keys, context, state)
                .await
            {
                warn!(
                    memory_id = %scheduled.decl.id,
                    node_id = %node_id,
                    error = %e,
                    "Memory update failed, continuing run"
                );
            }
        }

        if let Some(chat) = &self.chat {
            let output = state.output(node_id).cloned().unwrap_or(Value::Null);
            if let Err(e) = chat.record(node_id, context, &output).await {
                warn!(node_id = %node_id, error = %e, "Chat history record failed");
            }
        }
    }

    fn scheduled_for<'a>(
        &'a self,
        node_id: &'a str,
        schedule: impl Fn(&MemoryDecl) -> &Vec<String> + 'a,
    ) -> impl Iterator<Item = &'a ScheduledMemory> {
        self.nodes
            .iter()
            .filter(move |s| schedule(&s.decl).iter().any(|n| n == node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EphemeralStore;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMemory {
        id: String,
        queries: AtomicUsize,
        updates: AtomicUsize,
        fail_query: bool,
    }

    impl CountingMemory {
        fn new(id: &str, fail_query: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                queries: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                fail_query,
            })
        }
    }

    impl MemoryNode for CountingMemory {
        fn id(&self) -> &str {
            &self.id
        }

        fn query(
            &self,
            _keys: &[String],
            _context: &RunContext,
            _state: &RunState,
        ) -> BoxFuture<'_, Result<Value>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail_query;
            Box::pin(async move {
                if fail {
                    Err(CogError::MemorySpecialization {
                        memory: "counting".into(),
                        message: "boom".into(),
                    })
                } else {
                    Ok(json!(["remembered"]))
                }
            })
        }

        fn update(
            &self,
            _keys: &[String],
            _context: &RunContext,
            _state: &RunState,
        ) -> BoxFuture<'_, Result<()>> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn decl(id: &str, query_before: &[&str], update_after: &[&str]) -> MemoryDecl {
        MemoryDecl {
            id: id.into(),
            memory_type: None,
            collection_id: None,
            query_before: query_before.iter().map(|s| s.to_string()).collect(),
            update_after: update_after.iter().map(|s| s.to_string()).collect(),
            query_keys: vec![],
            update_keys: vec![],
        }
    }

    fn chat() -> ChatHistoryMemory {
        ChatHistoryMemory::new(Arc::new(EphemeralStore::new()), "chat_history", 10, 0)
    }

    #[tokio::test]
    async fn test_scheduling_exactly_once_per_visit() {
        let memory = CountingMemory::new("notes", false);
        let manager = MemoryManager::new(
            vec![ScheduledMemory {
                decl: decl("notes", &["analyze"], &["analyze"]),
                node: memory.clone(),
            }],
            None,
        )
        .unwrap();

        let ctx = RunContext::new();
        let mut state = RunState::new();

        // Two looped visits to the same node
        for _ in 0..2 {
            let snapshot = manager.before("analyze", &ctx, &state).await;
            assert_eq!(snapshot.get("notes"), Some(&json!(["remembered"])));
            state.record("analyze", json!({"ok": true}));
            manager.after("analyze", &ctx, &state).await;
        }

        assert_eq!(memory.queries.load(Ordering::SeqCst), 2);
        assert_eq!(memory.updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unscheduled_node_untouched() {
        let memory = CountingMemory::new("notes", false);
        let manager = MemoryManager::new(
            vec![ScheduledMemory {
                decl: decl("notes", &["analyze"], &["analyze"]),
                node: memory.clone(),
            }],
            None,
        )
        .unwrap();

        let ctx = RunContext::new();
        let state = RunState::new();
        let snapshot = manager.before("respond", &ctx, &state).await;
        manager.after("respond", &ctx, &state).await;

        assert!(snapshot.is_empty());
        assert_eq!(memory.queries.load(Ordering::SeqCst), 0);
        assert_eq!(memory.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_history_always_in_snapshot() {
        let manager = MemoryManager::new(vec![], Some(chat())).unwrap();

        let ctx = RunContext::from_value(json!("hello"));
        let mut state = RunState::new();

        let snapshot = manager.before("respond", &ctx, &state).await;
        assert!(snapshot.get(CHAT_HISTORY_ID).is_some());

        state.record("respond", json!("hi"));
        manager.after("respond", &ctx, &state).await;

        let snapshot = manager.before("respond", &ctx, &state).await;
        let recent = snapshot.get(CHAT_HISTORY_ID).unwrap()["recent"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["output"], json!("hi"));
    }

    #[tokio::test]
    async fn test_chat_disabled_leaves_snapshot_empty() {
        let manager = MemoryManager::new(vec![], None).unwrap();
        let snapshot = manager
            .before("respond", &RunContext::new(), &RunState::new())
            .await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_degrades_to_null_entry() {
        let memory = CountingMemory::new("flaky", true);
        let manager = MemoryManager::new(
            vec![ScheduledMemory {
                decl: decl("flaky", &["analyze"], &[]),
                node: memory,
            }],
            None,
        )
        .unwrap();

        let snapshot = manager
            .before("analyze", &RunContext::new(), &RunState::new())
            .await;
        assert_eq!(snapshot.get("flaky"), Some(&Value::Null));
    }

    #[test]
    fn test_reserved_id_rejected() {
        let memory = CountingMemory::new(CHAT_HISTORY_ID, false);
        let err = MemoryManager::new(
            vec![ScheduledMemory {
                decl: decl(CHAT_HISTORY_ID, &[], &[]),
                node: memory,
            }],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CogError::Config(_)));
    }
}
