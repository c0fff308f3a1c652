//! Agent 错误类型
//!
//! `chat()` 只在不可恢复时返回 Err：会话无法重建（认证失败）或配置错误。
//! 厂商错误、工具错误、取消、超时、轮次上限都以 ChatOutcome 的文本形式返回。

use thiserror::Error;

use crate::cloud::CloudError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("config error: {0}")]
    Config(String),

    /// 重登录失败等认证错误：结束本次 chat，调用方可重新配置凭据后重试
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}
