use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, warn};

use cogflow_core::error::Result;
use cogflow_core::traits::{AgentRunner, VectorStore};
use cogflow_core::types::{extract_keys, RunContext, RunState};

use crate::node::{call_sub_agent, payload_text, text_from_output, MemoryNode};

/// Log size at which the pad is resynthesized.
const LOG_THRESHOLD: usize = 10;

/// Fixed id of the consolidated pad document.
const PAD_DOC_ID: &str = "pad";

/// Consolidated working-notes memory.
///
/// Two collections back this node: the single pad document and an
/// append-only log. Updates append to the log; once the log reaches
/// `LOG_THRESHOLD` entries, a summarizer agent resynthesizes the pad from
/// the log contents and the log is cleared. Queries return the current pad.
/// Summarizer failures keep the log intact rather than failing the run.
pub struct ScratchpadMemory {
    id: String,
    pad_collection: String,
    log_collection: String,
    store: Arc<dyn VectorStore>,
    summarizer: Arc<dyn AgentRunner>,
}

impl ScratchpadMemory {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        store: Arc<dyn VectorStore>,
        summarizer: Arc<dyn AgentRunner>,
    ) -> Self {
        let collection = collection.into();
        Self {
            id: id.into(),
            log_collection: format!("{}.log", collection),
            pad_collection: collection,
            store,
            summarizer,
        }
    }

    /// Current pad contents, initialized empty if absent.
    async fn pad_text(&self) -> Result<String> {
        let existing = self.store.recent(&self.pad_collection, 0).await?;
        if let Some(text) = existing.documents.into_iter().next() {
            return Ok(text);
        }

        self.store
            .save(
                &self.pad_collection,
                &[String::new()],
                &[PAD_DOC_ID.to_string()],
                &[json!({})],
            )
            .await?;
        Ok(String::new())
    }

    async fn resynthesize(&self, pad: &str, log_ids: Vec<String>, entries: Vec<String>) {
        let payload = json!({
            "task": "summarize_scratchpad",
            "pad": pad,
            "entries": entries,
        });

        let summary = match call_sub_agent(&self.summarizer, payload).await {
            Ok(output) => text_from_output(&output, "summary"),
            Err(e) => {
                warn!(memory_id = %self.id, error = %e, "Scratchpad summarizer failed, keeping log");
                return;
            }
        };

        let Some(summary) = summary else {
            warn!(memory_id = %self.id, "Scratchpad summarizer output unparseable, keeping log");
            return;
        };

        let write = async {
            self.store
                .save(
                    &self.pad_collection,
                    &[summary],
                    &[PAD_DOC_ID.to_string()],
                    &[json!({"resynthesized_at": chrono::Utc::now().to_rfc3339()})],
                )
                .await?;
            self.store.delete(&self.log_collection, &log_ids).await
        };

        match write.await {
            Ok(()) => debug!(memory_id = %self.id, "Scratchpad pad resynthesized, log cleared"),
            Err(e) => warn!(memory_id = %self.id, error = %e, "Scratchpad rewrite failed"),
        }
    }
}

impl MemoryNode for ScratchpadMemory {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(
        &self,
        _keys: &[String],
        _context: &RunContext,
        _state: &RunState,
    ) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Ok(Value::String(self.pad_text().await?)) })
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
            let metadata = json!({"created_at": chrono::Utc::now().to_rfc3339()});
            self.store
                .save(&self.log_collection, &[payload], &[id], &[metadata])
                .await?;

            let log = self.store.recent(&self.log_collection, 0).await?;
            if log.len() >= LOG_THRESHOLD {
                let pad = self.pad_text().await?;
                self.resynthesize(&pad, log.ids, log.documents).await;
            }

            Ok(())
        })
    }
}
