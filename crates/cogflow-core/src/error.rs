use thiserror::Error;

#[derive(Debug, Error)]
pub enum CogError {
    // Workflow document errors
    #[error("Config error: {0}")]
    Config(String),

    // Flow resolution errors
    #[error("Unresolved decision at node '{node}': {reason}")]
    UnresolvedDecision { node: String, reason: String },

    #[error("Loop limit exceeded at node '{node}' (max_visits {max_visits})")]
    LoopLimitExceeded { node: String, max_visits: u32 },

    // Agent collaborator errors
    #[error("Agent execution failed at node '{node}': {message}")]
    AgentExecution { node: String, message: String },

    // Memory errors
    #[error("Memory specialization failed: {memory}: {message}")]
    MemorySpecialization { memory: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CogError>;
