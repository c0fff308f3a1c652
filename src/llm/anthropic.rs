//! Anthropic Messages 协议适配器
//!
//! 流式事件按内容块组织：`content_block_start` 声明块类型（text / thinking / tool_use），
//! `content_block_delta` 推送增量（工具参数为 `input_json_delta` 分片），
//! `content_block_stop` 时该块的工具参数定稿。

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::engine::events::{send_event, ChatEvent, EventSender};
use crate::llm::accumulator::ToolCallAccumulator;
use crate::llm::wire::{
    error_body_or_cancel, error_message_from_body, extract_error, http_client,
    is_stream_unsupported, next_or_cancel, send_or_cancel,
};
use crate::llm::{ChatAdapter, ChatRequest, LlmError, LlmTurn, ProviderConfig, ToolDefinition};
use crate::memory::{ToolCall, Turn};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages 适配器
#[derive(Clone)]
pub struct AnthropicAdapter {
    http: reqwest::Client,
}

impl AnthropicAdapter {
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
        let url = messages_url(&provider.base_url()?);
        let api_key = provider.api_key()?;
        let messages = build_messages(request.turns);
        let tools = build_tools(request.tools);

        let body = request_body(provider, request.system_prompt, &messages, &tools, true);
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
                tracing::info!(error = %message, "streaming rejected, retrying without stream");
                let body = request_body(provider, request.system_prompt, &messages, &tools, false);
                return self.complete_once(&url, api_key, &body, events, cancel).await;
            }
            return Err(LlmError::Provider(message));
        }

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            return read_complete(resp, events, cancel).await;
        }
        read_stream(resp, events, cancel).await
    }

    async fn complete_once(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> Result<LlmTurn, LlmError> {
        let Some(resp) = self.post(url, api_key, body, cancel).await? else {
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
        let mut req = self
            .http
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if let Some(key) = api_key {
            req = req.header("x-api-key", key);
        }
        send_or_cancel(req, cancel).await
    }
}

#[async_trait]
impl ChatAdapter for AnthropicAdapter {
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

/// base URL 已带 `/v1` 时只补 `/messages`
pub fn messages_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/messages")
    } else {
        format!("{base}/v1/messages")
    }
}

fn request_body(
    provider: &ProviderConfig,
    system_prompt: &str,
    messages: &[Value],
    tools: &[Value],
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": provider.model,
        "max_tokens": provider.max_tokens,
        "messages": messages,
        "stream": stream,
    });
    if !system_prompt.trim().is_empty() {
        body["system"] = json!(system_prompt);
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
    }
    body
}

pub fn build_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

/// 对话 → Anthropic messages
///
/// 工具调用是 assistant 消息里的 tool_use 块，工具结果是 user 消息里的 tool_result 块；
/// 相邻同角色消息合并，空文本块不发送（接口拒绝空 text）。
pub fn build_messages(turns: &[Turn]) -> Vec<Value> {
    let mut messages: Vec<(&'static str, Vec<Value>)> = Vec::new();

    let mut push = |role: &'static str, blocks: Vec<Value>| {
        if blocks.is_empty() {
            return;
        }
        if let Some((last_role, content)) = messages.last_mut() {
            if *last_role == role {
                content.extend(blocks);
                return;
            }
        }
        messages.push((role, blocks));
    };

    for turn in turns {
        match turn {
            Turn::User { text } => push("user", text_block(text)),
            Turn::Assistant { text } => push("assistant", text_block(text)),
            Turn::ToolCalls { text, calls } => {
                let mut blocks = text_block(text);
                blocks.extend(calls.iter().map(|c| {
                    json!({
                        "type": "tool_use",
                        "id": c.id,
                        "name": c.name,
                        "input": c.arguments,
                    })
                }));
                push("assistant", blocks);
            }
            Turn::ToolResult {
                call_id,
                content,
                is_error,
                ..
            } => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                });
                if *is_error {
                    block["is_error"] = json!(true);
                }
                push("user", vec![block]);
            }
        }
    }

    messages
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

fn text_block(text: &str) -> Vec<Value> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![json!({ "type": "text", "text": text })]
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: Option<MessageHead>,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<UsageBlock>,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageHead {
    #[serde(default)]
    usage: Option<UsageBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Option<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

async fn read_stream(
    resp: Response,
    events: Option<&EventSender>,
    cancel: &CancellationToken,
) -> Result<LlmTurn, LlmError> {
    let mut stream = Box::pin(resp.bytes_stream().eventsource());
    let mut text = String::new();
    let mut calls = ToolCallAccumulator::new();
    let mut prompt_tokens = 0u64;

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
        let parsed: StreamEvent = match serde_json::from_str(data) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::debug!(error = %e, data = %data, "skipping malformed SSE frame");
                continue;
            }
        };

        match parsed {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.and_then(|m| m.usage) {
                    prompt_tokens = usage.input_tokens;
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text: initial } if !initial.is_empty() => {
                    text.push_str(&initial);
                    send_event(events, ChatEvent::TextDelta { text: initial });
                }
                ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                    send_event(events, ChatEvent::ThinkingDelta { text: thinking });
                }
                ContentBlock::ToolUse { id, name, input } => {
                    calls.begin(index, &id, &name, input);
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text: piece } => {
                    if !piece.is_empty() {
                        text.push_str(&piece);
                        send_event(events, ChatEvent::TextDelta { text: piece });
                    }
                }
                BlockDelta::ThinkingDelta { thinking } => {
                    if !thinking.is_empty() {
                        send_event(events, ChatEvent::ThinkingDelta { text: thinking });
                    }
                }
                BlockDelta::InputJsonDelta { partial_json } => calls.append(index, &partial_json),
                BlockDelta::Other => {}
            },
            StreamEvent::ContentBlockStop { index } => calls.complete(index),
            StreamEvent::MessageDelta { usage } => {
                if let Some(usage) = usage {
                    send_event(
                        events,
                        ChatEvent::Usage {
                            prompt_tokens: prompt_tokens.max(usage.input_tokens),
                            completion_tokens: usage.output_tokens,
                        },
                    );
                }
            }
            StreamEvent::MessageStop => break,
            StreamEvent::Error { error } => {
                let message = extract_error(&json!({ "error": error }))
                    .unwrap_or_else(|| "unknown provider error".to_string());
                return Err(LlmError::Provider(message));
            }
            StreamEvent::Ping | StreamEvent::Unknown => {}
        }
    }

    Ok(LlmTurn::from_parts(text, calls.finish()))
}

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
    let blocks = value
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| LlmError::InvalidResponse("response has no content array".into()))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            Some("thinking") => {
                if let Some(t) = block.get("thinking").and_then(|v| v.as_str()) {
                    send_event(events, ChatEvent::ThinkingDelta { text: t.to_string() });
                }
            }
            Some("tool_use") => {
                let input = match block.get("input") {
                    Some(v @ Value::Object(_)) => v.clone(),
                    _ => json!({}),
                };
                calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: input,
                });
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        send_event(events, ChatEvent::TextDelta { text: text.clone() });
    }
    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        send_event(
            events,
            ChatEvent::Usage {
                prompt_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                completion_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            },
        );
    }
    Ok(LlmTurn::from_parts(text, calls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::wire::stalled_sse_server;
    use crate::llm::ProviderKind;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(frames: &[(&str, &str)]) -> String {
        frames
            .iter()
            .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
            .collect()
    }

    fn provider(server: &MockServer) -> ProviderConfig {
        ProviderConfig::new(ProviderKind::Anthropic)
            .with_base_url(server.uri())
            .with_api_key("sk-ant-test")
    }

    #[test]
    fn test_messages_url() {
        assert_eq!(
            messages_url("https://api.anthropic.com"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(messages_url("http://proxy/v1/"), "http://proxy/v1/messages");
    }

    #[test]
    fn test_build_messages_merges_tool_results_into_one_user_message() {
        let turns = vec![
            Turn::User { text: "check".into() },
            Turn::ToolCalls {
                text: String::new(),
                calls: vec![
                    ToolCall {
                        id: "t1".into(),
                        name: "get_resource".into(),
                        arguments: json!({"path": "hosts", "uuid": "h1"}),
                    },
                    ToolCall {
                        id: "t2".into(),
                        name: "zql_query".into(),
                        arguments: json!({"zql": "count vminstance"}),
                    },
                ],
            },
            Turn::ToolResult {
                call_id: "t1".into(),
                name: "get_resource".into(),
                content: "{}".into(),
                is_error: false,
            },
            Turn::ToolResult {
                call_id: "t2".into(),
                name: "zql_query".into(),
                content: "{\"error\":\"bad\"}".into(),
                is_error: true,
            },
        ];
        let msgs = build_messages(&turns);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["role"], "assistant");
        assert_eq!(msgs[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(msgs[1]["content"][0]["type"], "tool_use");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"][1]["tool_use_id"], "t2");
        assert_eq!(msgs[2]["content"][1]["is_error"], true);
    }

    #[tokio::test]
    async fn test_stream_text_thinking_and_tool_use() {
        let server = MockServer::start().await;
        let body = sse(&[
            ("message_start", r#"{"type":"message_start","message":{"usage":{"input_tokens":20,"output_tokens":1}}}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"need hosts"}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Looking up."}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":1}"#),
            ("ping", r#"{"type":"ping"}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"toolu_1","name":"query_resources","input":{}}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#),
            ("content_block_delta", r#"{"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"\"hosts\"}"}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":2}"#),
            ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":15}}"#),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({"system": "sys", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = AnthropicAdapter::new(Duration::from_secs(5));
        let turns = vec![Turn::User { text: "list hosts".into() }];
        let request = ChatRequest {
            system_prompt: "sys",
            turns: &turns,
            tools: &[],
        };
        let turn = adapter
            .call(&provider(&server), request, Some(&tx), &CancellationToken::new())
            .await;
        match turn {
            LlmTurn::ToolCallBatch { text, calls } => {
                assert_eq!(text, "Looking up.");
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "toolu_1");
                assert_eq!(calls[0].arguments, json!({"path": "hosts"}));
            }
            other => panic!("unexpected turn: {other:?}"),
        }

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events[0], ChatEvent::ThinkingDelta { text: "need hosts".into() });
        assert_eq!(events[1], ChatEvent::TextDelta { text: "Looking up.".into() });
        assert_eq!(
            events[2],
            ChatEvent::Usage {
                prompt_tokens: 20,
                completion_tokens: 15
            }
        );
    }

    #[tokio::test]
    async fn test_stream_error_event() {
        let server = MockServer::start().await;
        let body = sse(&[(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )]);
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new(Duration::from_secs(5));
        let turns = vec![Turn::User { text: "hi".into() }];
        let request = ChatRequest {
            system_prompt: "",
            turns: &turns,
            tools: &[],
        };
        let turn = adapter
            .call(&provider(&server), request, None, &CancellationToken::new())
            .await;
        assert_eq!(
            turn,
            LlmTurn::ProviderError("provider error: overloaded_error: Overloaded".into())
        );
    }

    #[tokio::test]
    async fn test_non_stream_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Done."},
                    {"type": "tool_use", "id": "toolu_9", "name": "get_resource", "input": {"path": "hosts", "uuid": "x"}}
                ],
                "usage": {"input_tokens": 5, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new(Duration::from_secs(5));
        let turns = vec![Turn::User { text: "hi".into() }];
        let request = ChatRequest {
            system_prompt: "",
            turns: &turns,
            tools: &[],
        };
        let turn = adapter
            .call(&provider(&server), request, None, &CancellationToken::new())
            .await;
        match turn {
            LlmTurn::ToolCallBatch { text, calls } => {
                assert_eq!(text, "Done.");
                assert_eq!(calls[0].arguments["uuid"], "x");
            }
            other => panic!("unexpected turn: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_rejected_falls_back_to_single_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "streaming is not supported for this deployment"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "4 hosts are connected."}],
                "usage": {"input_tokens": 8, "output_tokens": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = AnthropicAdapter::new(Duration::from_secs(5));
        let turns = vec![Turn::User { text: "hosts?".into() }];
        let request = ChatRequest {
            system_prompt: "",
            turns: &turns,
            tools: &[],
        };
        let turn = adapter
            .call(&provider(&server), request, Some(&tx), &CancellationToken::new())
            .await;
        assert_eq!(turn, LlmTurn::FinalText("4 hosts are connected.".into()));

        let mut texts = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let ChatEvent::TextDelta { text } = ev {
                texts.push(text);
            }
        }
        assert_eq!(texts, vec!["4 hosts are connected.".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_before_response_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new(Duration::from_secs(60));
        let turns = vec![Turn::User { text: "hi".into() }];
        let request = ChatRequest {
            system_prompt: "",
            turns: &turns,
            tools: &[],
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let turn = tokio::time::timeout(
            Duration::from_secs(5),
            adapter.call(&provider(&server), request, None, &cancel),
        )
        .await
        .expect("adapter should return promptly after cancel");
        assert_eq!(turn, LlmTurn::Aborted);
    }

    #[tokio::test]
    async fn test_cancel_while_reading_stream_aborts() {
        let base = stalled_sse_server(
            "event: content_block_delta\n\
             data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        )
        .await;
        let cfg = ProviderConfig::new(ProviderKind::Anthropic)
            .with_base_url(base)
            .with_api_key("sk-ant-test");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = AnthropicAdapter::new(Duration::from_secs(5));
        let turns = vec![Turn::User { text: "hi".into() }];
        let request = ChatRequest {
            system_prompt: "",
            turns: &turns,
            tools: &[],
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let call = adapter.call(&cfg, request, Some(&tx), &cancel);
        let stop = async move {
            while let Some(ev) = rx.recv().await {
                if let ChatEvent::TextDelta { text } = ev {
                    assert_eq!(text, "Hel");
                    trigger.cancel();
                    return;
                }
            }
        };
        let (turn, ()) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(call, stop) })
            .await
            .expect("adapter should return promptly after cancel");
        assert_eq!(turn, LlmTurn::Aborted);
    }
}
