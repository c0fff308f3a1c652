//! 核心类型：错误、chat 终止状态

pub mod error;
pub mod state;

pub use error::AgentError;
pub use state::{ChatOutcome, ChatState, STOPPED_BY_USER};
