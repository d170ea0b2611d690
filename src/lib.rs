//! cogflow — declarative multi-step agent workflow engine with scoped memory.
//!
//! Facade over the workspace crates: `cogflow-core` (types, document model,
//! collaborator traits), `cogflow-memory` (scheduled memory nodes and the
//! storage backend registry), and `cogflow-engine` (flow graph and run
//! coordination).

pub use cogflow_core::config::{
    AgentDecl, EndSpec, FlowConfig, MemoryDecl, TransitionConfig, WorkflowConfig,
};
pub use cogflow_core::error::{CogError, Result};
pub use cogflow_core::traits::{AgentRunner, QueryResult, VectorStore};
pub use cogflow_core::types::{
    extract_keys, normalize_decision, MemorySnapshot, RunContext, RunState, RunStatus,
};

pub use cogflow_memory::{
    clear_registry, configure, get_or_create, set_factory, BaseMemory, ChatHistoryMemory,
    EphemeralStore, MemoryManager, MemoryNode, MemoryTypeRegistry, PersonaAgents, PersonaMemory,
    ScheduledMemory, ScratchpadMemory, StorageConfig, StorageHandle, StorageMode, CHAT_HISTORY_ID,
};

pub use cogflow_engine::{AgentRegistry, Cog, FlowGraph, Step, Workflow};
