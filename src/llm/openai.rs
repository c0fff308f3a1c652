//! OpenAI Chat Completions 兼容协议适配器
//!
//! 覆盖 OpenAI / DeepSeek / 通义千问 / OpenRouter / Ollama 及任意兼容网关：
//! - 流式：SSE 帧中的 `delta.content` 为正文，`delta.reasoning_content` 为思考流，
//!   `delta.tool_calls` 按 index 分片累积，`[DONE]` 结束
//! - 厂商拒绝「流式 + 工具」时降级为一次非流式调用，完整文本作为一个增量重放

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::engine::events::{send_event, ChatEvent, EventSender};
use crate::llm::accumulator::{parse_arguments, ToolCallAccumulator};
use crate::llm::wire::{
    error_body_or_cancel, error_message_from_body, extract_error, http_client,
    is_stream_unsupported, next_or_cancel, send_or_cancel,
};
use crate::llm::{ChatAdapter, ChatRequest, LlmError, LlmTurn, ProviderConfig, ToolDefinition};
use crate::memory::{ToolCall, Turn};

/// OpenAI 兼容适配器
#[derive(Clone)]
pub struct OpenAiAdapter {
    http: reqwest::Client,
}

impl OpenAiAdapter {
    /// `timeout` 同时约束建立连接与每次读取（含流式响应中两帧之间的间隔）
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: http_client(timeout),
        }
    }

    async fn run(
        &self,
        provider: &ProviderConfig,
        request: ChatRequest<'_>,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> Result<LlmTurn, LlmError> {
        let url = format!("{}/chat/completions", provider.base_url()?);
        let api_key = provider.api_key()?;
        let messages = build_messages(request.system_prompt, request.turns);
        let tools = build_tools(request.tools);

        let body = request_body(provider, &messages, &tools, true);
        let Some(resp) = self.post(&url, api_key, &body, cancel).await? else {
            return Ok(LlmTurn::Aborted);
        };

        let status = resp.status();
        if !status.is_success() {
            let Some(text) = error_body_or_cancel(resp, cancel).await else {
                return Ok(LlmTurn::Aborted);
            };
            let message = error_message_from_body(status, &text);
            if is_stream_unsupported(&message) {
                tracing::info!(
                    provider = provider.kind.id(),
                    error = %message,
                    "streaming rejected, retrying without stream"
                );
                return self
                    .complete_once(&url, api_key, provider, &messages, &tools, events, cancel)
                    .await;
            }
            return Err(LlmError::Provider(message));
        }

        // 部分网关忽略 stream 参数直接返回完整 JSON
        if is_json_response(&resp) {
            return read_complete(resp, events, cancel).await;
        }

        // 已推送过增量时不再降级，否则完整文本会被重放一遍
        let mut delivered = false;
        let streamed = read_stream(resp, events, cancel, &mut delivered).await;
        match streamed {
            Err(LlmError::Provider(message)) if !delivered && is_stream_unsupported(&message) => {
                tracing::info!(
                    provider = provider.kind.id(),
                    error = %message,
                    "stream aborted by provider, retrying without stream"
                );
                self.complete_once(&url, api_key, provider, &messages, &tools, events, cancel)
                    .await
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_once(
        &self,
        url: &str,
        api_key: Option<&str>,
        provider: &ProviderConfig,
        messages: &[Value],
        tools: &[Value],
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> Result<LlmTurn, LlmError> {
        let body = request_body(provider, messages, tools, false);
        let Some(resp) = self.post(url, api_key, &body, cancel).await? else {
            return Ok(LlmTurn::Aborted);
        };
        let status = resp.status();
        if !status.is_success() {
            let Some(text) = error_body_or_cancel(resp, cancel).await else {
                return Ok(LlmTurn::Aborted);
            };
            return Err(LlmError::Provider(error_message_from_body(status, &text)));
        }
        read_complete(resp, events, cancel).await
    }

    async fn post(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Response>, LlmError> {
        let mut req = self.http.post(url).json(body);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }
        send_or_cancel(req, cancel).await
    }
}

#[async_trait]
impl ChatAdapter for OpenAiAdapter {
    async fn call(
        &self,
        provider: &ProviderConfig,
        request: ChatRequest<'_>,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> LlmTurn {
        self.run(provider, request, events, cancel).await.into()
    }
}

fn request_body(provider: &ProviderConfig, messages: &[Value], tools: &[Value], stream: bool) -> Value {
    let mut body = json!({
        "model": provider.model,
        "messages": messages,
        "max_tokens": provider.max_tokens,
        "stream": stream,
    });
    if stream {
        body["stream_options"] = json!({ "include_usage": true });
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
        body["tool_choice"] = json!("auto");
    }
    body
}

fn is_json_response(resp: &Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// 对话 → OpenAI messages：system 在首位，工具调用参数序列化为 JSON 字符串
pub fn build_messages(system_prompt: &str, turns: &[Turn]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system_prompt.trim().is_empty() {
        messages.push(json!({ "role": "system", "content": system_prompt }));
    }
    for turn in turns {
        let msg = match turn {
            Turn::User { text } => json!({ "role": "user", "content": text }),
            Turn::Assistant { text } => json!({ "role": "assistant", "content": text }),
            Turn::ToolCalls { text, calls } => {
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if text.is_empty() {
                    Value::Null
                } else {
                    Value::String(text.clone())
                };
                json!({ "role": "assistant", "content": content, "tool_calls": tool_calls })
            }
            Turn::ToolResult {
                call_id, content, ..
            } => json!({ "role": "tool", "tool_call_id": call_id, "content": content }),
        };
        messages.push(msg);
    }
    messages
}

pub fn build_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    usage: Option<UsageBlock>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// `delivered` 记录是否已向调用方推送过思考或正文增量
async fn read_stream(
    resp: Response,
    events: Option<&EventSender>,
    cancel: &CancellationToken,
    delivered: &mut bool,
) -> Result<LlmTurn, LlmError> {
    let mut stream = Box::pin(resp.bytes_stream().eventsource());
    let mut text = String::new();
    let mut calls = ToolCallAccumulator::new();

    loop {
        let frame = match next_or_cancel(&mut stream, cancel).await {
            None => return Ok(LlmTurn::Aborted),
            Some(None) => break,
            Some(Some(frame)) => frame,
        };
        let event = frame.map_err(|e| LlmError::InvalidResponse(format!("SSE error: {e}")))?;
        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            break;
        }
        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, data = %data, "skipping malformed SSE frame");
                continue;
            }
        };
        if let Some(message) = extract_error(&value) {
            return Err(LlmError::Provider(message));
        }
        let chunk: StreamChunk = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised SSE frame");
                continue;
            }
        };

        if let Some(usage) = chunk.usage {
            send_event(
                events,
                ChatEvent::Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                },
            );
        }
        for choice in chunk.choices.unwrap_or_default() {
            let delta = choice.delta.unwrap_or_default();
            if let Some(reasoning) = delta.reasoning_content.filter(|s| !s.is_empty()) {
                *delivered = true;
                send_event(events, ChatEvent::ThinkingDelta { text: reasoning });
            }
            if let Some(content) = delta.content.filter(|s| !s.is_empty()) {
                *delivered = true;
                text.push_str(&content);
                send_event(events, ChatEvent::TextDelta { text: content });
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let index = match tc.index {
                    Some(i) => i,
                    None => calls.index_for_id(tc.id.as_deref()),
                };
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                calls.apply_delta(index, tc.id.as_deref(), name.as_deref(), arguments.as_deref());
            }
        }
    }

    Ok(LlmTurn::from_parts(text, calls.finish()))
}

/// 非流式响应：思考与正文各作为一个增量重放
async fn read_complete(
    resp: Response,
    events: Option<&EventSender>,
    cancel: &CancellationToken,
) -> Result<LlmTurn, LlmError> {
    let value: Value = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(LlmTurn::Aborted),
        v = resp.json::<Value>() => v?,
    };
    if let Some(message) = extract_error(&value) {
        return Err(LlmError::Provider(message));
    }
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        send_event(
            events,
            ChatEvent::Usage {
                prompt_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            },
        );
    }
    let message = value
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices[0].message".into()))?;

    if let Some(reasoning) = message
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        send_event(events, ChatEvent::ThinkingDelta { text: reasoning.to_string() });
    }
    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if !text.is_empty() {
        send_event(events, ChatEvent::TextDelta { text: text.clone() });
    }

    let calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(complete_tool_call).collect())
        .unwrap_or_default();
    Ok(LlmTurn::from_parts(text, calls))
}

fn complete_tool_call(raw: &Value) -> ToolCall {
    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    let function = raw.get("function").cloned().unwrap_or(Value::Null);
    let name = function
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => parse_arguments(s),
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    };
    ToolCall { id, name, arguments }
}
