//! Flow execution engine — declarative multi-step agent workflows.
//!
//! A workflow is a set of nodes, each backed by an external agent
//! collaborator, connected by transition rules (direct, decision-branching
//! with loop guards, terminal). The `Cog` coordinator walks the graph from
//! the start node, schedules memory queries/updates around each node via
//! the `MemoryManager`, accumulates outputs in the shared run state, and
//! returns the declared slice of the final state.

pub mod cog;
pub mod graph;
pub mod registry;
pub mod workflow;

pub use cog::Cog;
pub use graph::{FlowGraph, Step};
pub use registry::AgentRegistry;
pub use workflow::Workflow;
