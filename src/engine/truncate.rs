//! 工具结果截断：序列化后按字节预算裁剪，保证写回对话的内容不超过预算

use serde_json::Value;

pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// 序列化并裁剪到 `budget` 字节以内
pub fn serialize_clipped(payload: &Value, budget: usize) -> String {
    let text = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    clip(&text, budget)
}

/// 超出预算时在字符边界处截断并追加标记；结果长度 ≤ budget
pub fn clip(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let (keep, marker) = if budget > TRUNCATION_MARKER.len() {
        (budget - TRUNCATION_MARKER.len(), TRUNCATION_MARKER)
    } else {
        (budget, "")
    };
    let mut end = keep;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], marker)
}
