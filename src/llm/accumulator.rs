//! 工具调用参数重组
//!
//! 厂商把工具调用参数 JSON 分片推送（按 index 或内容块），在此按 index 累积，
//! 调用结束（内容块结束或流结束）时解析；解析失败退化为空对象，不让整轮失败。

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::memory::ToolCall;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    /// 起始块自带的完整参数（Anthropic tool_use.input），没有分片时使用
    initial: Option<Value>,
}

impl PartialCall {
    fn into_call(self) -> ToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            match self.initial {
                Some(v @ Value::Object(_)) => v,
                _ => Value::Object(Map::new()),
            }
        } else {
            parse_arguments(&self.arguments)
        };
        let id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id
        };
        ToolCall {
            id,
            name: self.name,
            arguments,
        }
    }
}

/// 按 index 累积的工具调用
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    open: BTreeMap<usize, PartialCall>,
    done: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内容块开始（Anthropic tool_use）
    pub fn begin(&mut self, index: usize, id: &str, name: &str, initial: Option<Value>) {
        let entry = self.open.entry(index).or_default();
        entry.id = id.to_string();
        entry.name = name.to_string();
        entry.initial = initial;
    }

    /// OpenAI 风格增量：id / name 只在首片出现，arguments 逐片拼接
    pub fn apply_delta(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        fragment: Option<&str>,
    ) {
        let entry = self.open.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if entry.id.is_empty() {
                entry.id = id.to_string();
            }
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            if entry.name.is_empty() {
                entry.name = name.to_string();
            }
        }
        if let Some(fragment) = fragment {
            entry.arguments.push_str(fragment);
        }
    }

    pub fn append(&mut self, index: usize, fragment: &str) {
        self.apply_delta(index, None, None, Some(fragment));
    }

    /// 没有 index 的厂商：按 id 找已有调用；不带 id 的分片续接最近打开的调用；否则分配新 index
    pub fn index_for_id(&self, id: Option<&str>) -> usize {
        match id.filter(|s| !s.is_empty()) {
            Some(id) => {
                if let Some((idx, _)) = self.open.iter().find(|(_, c)| c.id == id) {
                    return *idx;
                }
            }
            None => {
                if let Some(idx) = self.open.keys().next_back() {
                    return *idx;
                }
            }
        }
        self.next_index()
    }

    fn next_index(&self) -> usize {
        let open = self.open.keys().next_back().map(|i| i + 1).unwrap_or(0);
        let done = self.done.keys().next_back().map(|i| i + 1).unwrap_or(0);
        open.max(done)
    }

    /// 内容块结束：立即解析该调用
    pub fn complete(&mut self, index: usize) {
        if let Some(partial) = self.open.remove(&index) {
            self.done.insert(index, partial.into_call());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.done.is_empty()
    }

    /// 流结束：收尾所有未结束的调用，按 index 排序返回
    pub fn finish(mut self) -> Vec<ToolCall> {
        let open: Vec<usize> = self.open.keys().copied().collect();
        for index in open {
            self.complete(index);
        }
        self.done.into_values().collect()
    }
}

/// 解析参数文本；非对象或解析失败时返回 `{}`
pub fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(other) => {
            tracing::warn!(arguments = %other, "tool arguments are not an object, using {{}}");
            Value::Object(Map::new())
        }
        Err(e) => {
            tracing::warn!(error = %e, raw = %raw, "failed to parse tool arguments, using {{}}");
            Value::Object(Map::new())
        }
    }
}
