use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{MemorySnapshot, RunContext, RunState};

/// Agent collaborator — one model-backed node body.
///
/// The engine invokes `run` once per node visit with the immutable run
/// context, the state accumulated so far, and the memory snapshot assembled
/// for this node. The output is a JSON value; decision keys are read from
/// object outputs. Retry, if any, is the implementation's responsibility.
pub trait AgentRunner: Send + Sync + 'static {
    fn run(
        &self,
        context: &RunContext,
        state: &RunState,
        memory: &MemorySnapshot,
    ) -> BoxFuture<'_, Result<Value>>;
}

impl std::fmt::Debug for dyn AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AgentRunner")
    }
}

/// Ranked matches from a vector store query.
///
/// The three vectors are parallel: `ids[i]`, `documents[i]` and
/// `metadatas[i]` describe one match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Value>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate matches as (id, document, metadata) triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.ids
            .iter()
            .zip(self.documents.iter())
            .zip(self.metadatas.iter())
            .map(|((id, doc), meta)| (id.as_str(), doc.as_str(), meta))
    }
}

/// Vector store collaborator — similarity-searchable document collections.
///
/// Saving an id that already exists in the collection upserts: the document
/// and metadata are replaced in place.
pub trait VectorStore: Send + Sync + 'static {
    /// Save documents with their ids and metadata into a collection.
    fn save(
        &self,
        collection: &str,
        documents: &[String],
        ids: &[String],
        metadatas: &[Value],
    ) -> BoxFuture<'_, Result<()>>;

    /// Query a collection for the `k` best matches to `text`.
    fn query(&self, collection: &str, text: &str, k: usize) -> BoxFuture<'_, Result<QueryResult>>;

    /// Chronological tail of a collection, oldest first (limit 0 = all).
    fn recent(&self, collection: &str, limit: usize) -> BoxFuture<'_, Result<QueryResult>>;

    /// Delete documents by id.
    fn delete(&self, collection: &str, ids: &[String]) -> BoxFuture<'_, Result<()>>;
}
