pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::WorkflowConfig;
pub use error::{CogError, Result};
pub use types::*;
