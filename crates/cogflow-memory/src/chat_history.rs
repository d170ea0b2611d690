use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use cogflow_core::error::Result;
use cogflow_core::traits::VectorStore;
use cogflow_core::types::RunContext;

/// Reserved id of the implicit chat-history slot in every memory snapshot.
pub const CHAT_HISTORY_ID: &str = "chat_history";

/// Automatic conversation memory.
///
/// Owned directly by the `MemoryManager` as a reserved, toggle-only slot;
/// never user-declarable. Each completed node visit records one turn. The
/// snapshot exposes two independent slices over the same store: a
/// chronological `recent` tail and a semantically `relevant` selection, so
/// recency and relevance are never conflated.
pub struct ChatHistoryMemory {
    store: Arc<dyn VectorStore>,
    collection: String,
    /// Cap on the recency slice (0 = unbounded).
    max_results: usize,
    /// Cap on the retrieval slice (0 = disabled).
    max_retrieval: usize,
}

impl ChatHistoryMemory {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        max_results: usize,
        max_retrieval: usize,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            max_results,
            max_retrieval,
        }
    }

    fn input_text(context: &RunContext) -> String {
        match context.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => serde_json::to_string(context.data()).unwrap_or_default(),
        }
    }

    /// Record the latest context/output pair as one turn.
    pub async fn record(&self, node_id: &str, context: &RunContext, output: &Value) -> Result<()> {
        let turn = json!({
            "input": Self::input_text(context),
            "output": output,
            "node": node_id,
        });
        let document = serde_json::to_string(&turn)?;
        let id = uuid::Uuid::new_v4().to_string();
        let metadata = json!({
            "node": node_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.store
            .save(&self.collection, &[document], &[id], &[metadata])
            .await?;
        debug!(node_id = %node_id, "Chat turn recorded");
        Ok(())
    }

    /// Assemble this slot's snapshot entry.
    pub async fn snapshot(&self, context: &RunContext) -> Result<Value> {
        let recent = self.store.recent(&self.collection, self.max_results).await?;
        let recent: Vec<Value> = recent
            .documents
            .iter()
            .map(|doc| serde_json::from_str(doc).unwrap_or_else(|_| Value::String(doc.clone())))
            .collect();

        let mut entry = json!({ "recent": recent });

        if self.max_retrieval > 0 {
            let query = Self::input_text(context);
            let matches = self
                .store
                .query(&self.collection, &query, self.max_retrieval)
                .await?;
            let relevant: Vec<Value> = matches
                .documents
                .iter()
                .map(|doc| serde_json::from_str(doc).unwrap_or_else(|_| Value::String(doc.clone())))
                .collect();
            entry["relevant"] = Value::Array(relevant);
        }

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EphemeralStore;

    fn chat(max_results: usize, max_retrieval: usize) -> ChatHistoryMemory {
        ChatHistoryMemory::new(
            Arc::new(EphemeralStore::new()),
            "chat_history",
            max_results,
            max_retrieval,
        )
    }

    #[tokio::test]
    async fn test_recent_slice_is_bounded_and_ordered() {
        let memory = chat(2, 0);
        for i in 0..4 {
            let ctx = RunContext::from_value(json!(format!("question {}", i)));
            memory
                .record("respond", &ctx, &json!(format!("answer {}", i)))
                .await
                .unwrap();
        }

        let entry = memory
            .snapshot(&RunContext::from_value(json!("anything")))
            .await
            .unwrap();
        let recent = entry["recent"].as_array().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["input"], "question 2");
        assert_eq!(recent[1]["input"], "question 3");
    }

    #[tokio::test]
    async fn test_retrieval_disabled_omits_relevant() {
        let memory = chat(10, 0);
        memory
            .record(
                "respond",
                &RunContext::from_value(json!("shipping delay")),
                &json!("it shipped"),
            )
            .await
            .unwrap();

        let entry = memory
            .snapshot(&RunContext::from_value(json!("shipping")))
            .await
            .unwrap();
        assert!(entry.get("relevant").is_none());
        assert_eq!(entry["recent"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retrieval_slice_independent_of_recency() {
        let memory = chat(1, 5);
        memory
            .record(
                "respond",
                &RunContext::from_value(json!("tell me about rust lifetimes")),
                &json!("lifetimes explained"),
            )
            .await
            .unwrap();
        memory
            .record(
                "respond",
                &RunContext::from_value(json!("what about the weather")),
                &json!("sunny"),
            )
            .await
            .unwrap();

        let entry = memory
            .snapshot(&RunContext::from_value(json!("rust lifetimes")))
            .await
            .unwrap();

        // Recency keeps only the last turn; retrieval still surfaces the
        // semantically matching older one.
        let recent = entry["recent"].as_array().unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["input"], "what about the weather");

        let relevant = entry["relevant"].as_array().unwrap();
        assert!(relevant
            .iter()
            .any(|t| t["input"].as_str().unwrap().contains("lifetimes")));
    }

    #[tokio::test]
    async fn test_unbounded_recent() {
        let memory = chat(0, 0);
        for i in 0..30 {
            let ctx = RunContext::from_value(json!(format!("q{}", i)));
            memory.record("respond", &ctx, &json!("a")).await.unwrap();
        }

        let entry = memory
            .snapshot(&RunContext::from_value(json!("q")))
            .await
            .unwrap();
        assert_eq!(entry["recent"].as_array().unwrap().len(), 30);
    }
}
