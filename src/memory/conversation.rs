//! 对话历史
//!
//! 有序的轮次序列：用户文本、助手文本、助手工具调用请求、工具结果。
//! 约束：每个工具调用请求轮次之后、下一个用户轮次之前，每个调用 id 恰好对应一个工具结果轮次。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型请求执行的一次工具调用；创建后不可变，只被分发一次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// 单个对话轮次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    /// 助手请求执行工具；text 为随工具调用一同产生的文字（可为空）
    ToolCalls {
        text: String,
        calls: Vec<ToolCall>,
    },
    /// 已序列化并截断的工具结果
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
}

/// 对话：由引擎独占，只能通过引擎方法修改；调用方显式 clear 开始新对话
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Turn::User { text: text.into() });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Turn::Assistant { text: text.into() });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 最近一次工具调用请求中尚未得到结果的调用 id（按调用顺序）
    pub fn pending_call_ids(&self) -> Vec<String> {
        let Some(pos) = self
            .turns
            .iter()
            .rposition(|t| matches!(t, Turn::ToolCalls { .. }))
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.turns[pos + 1..]
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        match &self.turns[pos] {
            Turn::ToolCalls { calls, .. } => calls
                .iter()
                .filter(|c| !answered.contains(c.id.as_str()))
                .map(|c| c.id.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 工具结果轮次数量（测试与诊断用）
    pub fn tool_result_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::ToolResult { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "get_resource".to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn test_pending_call_ids() {
        let mut conv = Conversation::new();
        conv.push_user("list vms");
        assert!(conv.pending_call_ids().is_empty());

        conv.push(Turn::ToolCalls {
            text: String::new(),
            calls: vec![call("a"), call("b"), call("c")],
        });
        conv.push(Turn::ToolResult {
            call_id: "b".into(),
            name: "get_resource".into(),
            content: "{}".into(),
            is_error: false,
        });
        assert_eq!(conv.pending_call_ids(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(conv.tool_result_count(), 1);
    }

    #[test]
    fn test_turn_serializes_with_kind_tag() {
        let turn = Turn::User { text: "hi".into() };
        let v = serde_json::to_value(&turn).unwrap();
        assert_eq!(v, json!({"kind": "user", "text": "hi"}));
    }

    #[test]
    fn test_clear() {
        let mut conv = Conversation::new();
        conv.push_user("a");
        conv.push_assistant("b");
        assert_eq!(conv.len(), 2);
        conv.clear();
        assert!(conv.is_empty());
    }
}
