//! 工具层：资源工具定义、分发表与摘要格式化

pub mod describe;
pub mod dispatch;
pub mod kind;

pub use describe::describe;
pub use dispatch::{ToolDispatcher, ToolOutcome};
pub use kind::{definitions, CloudTool};
