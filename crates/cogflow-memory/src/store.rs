use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::{QueryResult, VectorStore};

struct Doc {
    id: String,
    text: String,
    metadata: Value,
    seq: u64,
}

/// In-memory vector store used by the default backend factory and the test
/// suites.
///
/// Collections keep insertion order (recency) and rank `query` matches by
/// naive token overlap with the query text. Deployments with a real
/// similarity store install their own factory via `backend::set_factory`.
pub struct EphemeralStore {
    collections: Mutex<Collections>,
}

struct Collections {
    docs: HashMap<String, Vec<Doc>>,
    next_seq: u64,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(Collections {
                docs: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|e| CogError::Storage(e.to_string()))
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn to_result<'a>(docs: impl IntoIterator<Item = &'a Doc>) -> QueryResult {
    let mut result = QueryResult::default();
    for doc in docs {
        result.ids.push(doc.id.clone());
        result.documents.push(doc.text.clone());
        result.metadatas.push(doc.metadata.clone());
    }
    result
}

impl VectorStore for EphemeralStore {
    fn save(
        &self,
        collection: &str,
        documents: &[String],
        ids: &[String],
        metadatas: &[Value],
    ) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_string();
        let entries: Vec<(String, String, Value)> = ids
            .iter()
            .zip(documents.iter())
            .zip(metadatas.iter())
            .map(|((id, doc), meta)| (id.clone(), doc.clone(), meta.clone()))
            .collect();

        Box::pin(async move {
            let mut guard = self.lock()?;
            let seq_base = guard.next_seq;
            let mut added = 0u64;
            let docs = guard.docs.entry(collection.clone()).or_default();

            for (id, text, metadata) in entries {
                if let Some(existing) = docs.iter_mut().find(|d| d.id == id) {
                    // Upsert: replace document and metadata, keep position
                    existing.text = text;
                    existing.metadata = metadata;
                } else {
                    docs.push(Doc {
                        id,
                        text,
                        metadata,
                        seq: seq_base + added,
                    });
                    added += 1;
                }
            }

            guard.next_seq = seq_base + added;
            debug!(collection = %collection, "Documents saved");
            Ok(())
        })
    }

    fn query(&self, collection: &str, text: &str, k: usize) -> BoxFuture<'_, Result<QueryResult>> {
        let collection = collection.to_string();
        let query_tokens = tokenize(text);

        Box::pin(async move {
            let guard = self.lock()?;
            let Some(docs) = guard.docs.get(&collection) else {
                return Ok(QueryResult::default());
            };

            let mut scored: Vec<(usize, &Doc)> = docs
                .iter()
                .filter_map(|doc| {
                    let doc_tokens = tokenize(&doc.text);
                    let overlap = query_tokens
                        .iter()
                        .filter(|t| doc_tokens.contains(t))
                        .count();
                    (overlap > 0).then_some((overlap, doc))
                })
                .collect();

            // Best overlap first, most recent breaking ties
            scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.seq.cmp(&a.1.seq)));
            scored.truncate(k);

            Ok(to_result(scored.into_iter().map(|(_, d)| d)))
        })
    }

    fn recent(&self, collection: &str, limit: usize) -> BoxFuture<'_, Result<QueryResult>> {
        let collection = collection.to_string();

        Box::pin(async move {
            let guard = self.lock()?;
            let Some(docs) = guard.docs.get(&collection) else {
                return Ok(QueryResult::default());
            };

            let mut ordered: Vec<&Doc> = docs.iter().collect();
            ordered.sort_by_key(|d| d.seq);
            let start = if limit == 0 || limit >= ordered.len() {
                0
            } else {
                ordered.len() - limit
            };

            Ok(to_result(ordered[start..].iter().copied()))
        })
    }

    fn delete(&self, collection: &str, ids: &[String]) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_string();
        let ids = ids.to_vec();

        Box::pin(async move {
            let mut guard = self.lock()?;
            if let Some(docs) = guard.docs.get_mut(&collection) {
                docs.retain(|d| !ids.contains(&d.id));
            }
            Ok(())
        })
    }
}
