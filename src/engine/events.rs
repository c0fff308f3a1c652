//! 对话过程事件：推送给调用方做流式展示（思考、正文增量、工具开始 / 结束）
//!
//! 事件只是展示提示，权威结果是 `chat()` 返回的最终文本。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单个过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// 进入新一轮 Dispatching（第几轮）
    RoundUpdate { round: usize, max_rounds: usize },
    /// 模型内部推理流，与正文区分展示
    ThinkingDelta { text: String },
    /// 正文增量
    TextDelta { text: String },
    /// 开始执行工具；description 为一行可读摘要
    ToolStart {
        id: String,
        name: String,
        description: String,
    },
    ToolDone {
        id: String,
        name: String,
        ok: bool,
        duration_ms: u64,
    },
    /// 厂商回报的 token 用量
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
}

pub type EventSender = UnboundedSender<ChatEvent>;

/// 接收端已关闭时静默丢弃
pub fn send_event(tx: Option<&EventSender>, ev: ChatEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
