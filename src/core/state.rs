//! 单次 chat 调用的终止状态与返回值

use serde::Serialize;

/// 取消时返回的固定文本
pub const STOPPED_BY_USER: &str = "Generation stopped by user.";

/// 终止状态；除 Done 外都是软停止，附带一句说明文本
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Done,
    Aborted,
    TimedOut,
    RoundLimitReached,
    /// 厂商错误结束了本轮
    Failed,
}

impl ChatState {
    pub fn is_soft_stop(&self) -> bool {
        !matches!(self, ChatState::Done)
    }
}

/// `chat()` 的结果：权威的最终文本
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatOutcome {
    pub state: ChatState,
    pub text: String,
    /// 完成的工具轮数
    pub rounds: usize,
}

impl ChatOutcome {
    pub fn aborted(rounds: usize) -> Self {
        Self {
            state: ChatState::Aborted,
            text: STOPPED_BY_USER.to_string(),
            rounds,
        }
    }

    pub fn timed_out(rounds: usize, budget_secs: u64) -> Self {
        Self {
            state: ChatState::TimedOut,
            text: format!(
                "Stopped: this request took longer than {budget_secs}s. \
                 Try a narrower question or continue in a new message."
            ),
            rounds,
        }
    }

    pub fn round_limit(rounds: usize) -> Self {
        Self {
            state: ChatState::RoundLimitReached,
            text: format!(
                "Stopped after {rounds} tool rounds without reaching an answer. \
                 Try breaking the request into smaller steps."
            ),
            rounds,
        }
    }

    pub fn failed(rounds: usize, message: &str) -> Self {
        Self {
            state: ChatState::Failed,
            text: format!("The model provider returned an error: {message}"),
            rounds,
        }
    }
}
