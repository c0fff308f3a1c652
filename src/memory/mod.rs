//! 记忆层：单会话对话历史（轮次与工具调用）

pub mod conversation;

pub use conversation::{Conversation, ToolCall, Turn};
