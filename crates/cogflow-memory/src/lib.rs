//! Memory layer — scheduled, scoped memory around workflow node execution.
//!
//! A workflow declares `MemoryNode`s, each wrapping one vector-store
//! collection. The `MemoryManager` decides when each node's query/update
//! runs relative to node execution and assembles a read-only
//! `MemorySnapshot` for every executing agent. Specializations (chat
//! history, scratchpad, persona) layer extra behavior on the base
//! query/update contract; their failures degrade to base semantics instead
//! of failing the run.
//!
//! Storage handles are process-wide singletons keyed by storage id, managed
//! by the `backend` registry.

pub mod backend;
pub mod chat_history;
pub mod manager;
pub mod node;
pub mod persona;
pub mod scratchpad;
pub mod store;

pub use backend::{
    clear_registry, configure, get_or_create, set_factory, StorageConfig, StorageHandle,
    StorageMode, StoreFactory,
};
pub use chat_history::{ChatHistoryMemory, CHAT_HISTORY_ID};
pub use manager::{MemoryManager, ScheduledMemory};
pub use node::{BaseMemory, MemoryNode, MemoryTypeRegistry};
pub use persona::{PersonaAgents, PersonaMemory};
pub use scratchpad::ScratchpadMemory;
pub use store::EphemeralStore;
