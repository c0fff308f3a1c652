//! 适配器共用的 HTTP / SSE 辅助：可取消的发送与读帧、错误信封提取、流式降级判定

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::LlmError;

/// 适配器 HTTP 客户端：连接与单次读取都受 `timeout` 约束，整体时长由引擎的时间预算兜底
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to build HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// 发送请求；取消令牌先触发时返回 `Ok(None)`
pub async fn send_or_cancel(
    req: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Option<Response>, LlmError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        resp = req.send() => Ok(Some(resp?)),
    }
}

/// 读取下一帧；取消时返回 `None`，流结束时返回 `Some(None)`
pub async fn next_or_cancel<S>(stream: &mut S, cancel: &CancellationToken) -> Option<Option<S::Item>>
where
    S: Stream + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = stream.next() => Some(item),
    }
}

/// 读取错误响应正文；取消时返回 `None`
pub async fn error_body_or_cancel(resp: Response, cancel: &CancellationToken) -> Option<String> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        text = resp.text() => Some(text.unwrap_or_default()),
    }
}

/// 错误信封：`{"error": {"message"}}`、`{"error": "..."}`、`{"type":"error","error":{...}}`
pub fn extract_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if let Some(s) = error.as_str() {
        return Some(s.to_string());
    }
    if error.is_null() {
        return None;
    }
    let message = error
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown provider error");
    match error.get("type").and_then(|v| v.as_str()) {
        Some(kind) if !kind.is_empty() => Some(format!("{kind}: {message}")),
        _ => Some(message.to_string()),
    }
}

/// 从非 2xx 响应正文中提取可读错误信息
pub fn error_message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| extract_error(&v))
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {}", truncate_for_error(body, 500))
            }
        })
}

/// 厂商拒绝「流式 + 工具」组合的启发式：消息同时提到 stream 与不支持
pub fn is_stream_unsupported(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("stream")
        && (lower.contains("not support") || lower.contains("unsupported"))
}

pub fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        return input.to_string();
    }
    let mut end = max_len;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}

/// 测试用：回复响应头与第一段 SSE 后保持连接但不再发送，模拟卡住的流
#[cfg(test)]
pub(crate) async fn stalled_sse_server(first_chunk: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let chunk = first_chunk.to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let chunk = chunk.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let head = "HTTP/1.1 200 OK\r\n\
                            content-type: text/event-stream\r\n\
                            transfer-encoding: chunked\r\n\r\n";
                let body = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    format!("http://{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_unsupported_heuristic() {
        assert!(is_stream_unsupported(
            "Streaming is not supported when tools are specified"
        ));
        assert!(is_stream_unsupported("stream mode unsupported with functions"));
        assert!(!is_stream_unsupported("rate limit exceeded"));
        assert!(!is_stream_unsupported("model not supported"));
    }

    #[test]
    fn test_extract_error_shapes() {
        assert_eq!(
            extract_error(&json!({"error": {"message": "bad key"}})).as_deref(),
            Some("bad key")
        );
        assert_eq!(extract_error(&json!({"error": "boom"})).as_deref(), Some("boom"));
        assert_eq!(
            extract_error(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}))
                .as_deref(),
            Some("overloaded_error: Overloaded")
        );
        assert_eq!(extract_error(&json!({"error": null})), None);
        assert_eq!(extract_error(&json!({"choices": []})), None);
    }

    #[test]
    fn test_error_message_from_plain_body() {
        let msg = error_message_from_body(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert!(msg.contains("502"));
        assert!(msg.contains("upstream down"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "错误信息很长";
        let t = truncate_for_error(s, 4);
        assert!(t.ends_with("..."));
    }
}
