//! CloudPilot - 对话式云管理智能体
//!
//! 模块划分：
//! - **agent**: 组件装配（资源客户端、厂商路由、编排引擎）
//! - **cloud**: 通用认证 REST 资源客户端（会话、CRUD、动作、ZQL、异步任务轮询）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与 chat 终止状态
//! - **engine**: 多轮工具调用编排循环、过程事件、结果截断
//! - **llm**: 协议适配器（OpenAI 兼容 / Anthropic）、厂商配置与路由
//! - **memory**: 对话历史
//! - **observability**: tracing 日志初始化
//! - **repl**: 命令行交互
//! - **tools**: 资源工具定义与分发表

pub mod agent;
pub mod cloud;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod repl;
pub mod tools;

pub use agent::{create_agent, AgentComponents};
pub use core::{AgentError, ChatOutcome, ChatState};
pub use engine::{ChatEngine, ChatEvent, EngineSettings};
