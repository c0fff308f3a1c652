//! 资源 API 错误分类
//!
//! 非 2xx 响应解析服务端结构化错误信息；401/403 或消息命中「session/token + expired/invalid」
//! 时归类为 SessionExpired，由客户端触发一次静默重登录并重试。

use serde_json::Value;
use thiserror::Error;

/// 资源客户端错误（传输、API、会话过期、认证、异步任务超时）
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// ApiError 的子类：会话失效，驱动重登录路径
    #[error("session expired (HTTP {status}): {message}")]
    SessionExpired { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not logged in: no session and no stored credentials")]
    NotLoggedIn,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("async job did not finish in time: {0}")]
    JobTimeout(String),
}

impl CloudError {
    /// 根据状态码与响应体构造错误；会话失效的判定见 `looks_like_session_expiry`
    pub fn from_response(status: u16, body: &Value) -> Self {
        let message = extract_error_message(body)
            .unwrap_or_else(|| format!("request failed with status {status}"));
        if status == 401 || status == 403 || looks_like_session_expiry(&message) {
            CloudError::SessionExpired { status, message }
        } else {
            CloudError::Api { status, message }
        }
    }

    /// 重试后仍然会话失效时降级为普通 ApiError
    pub fn demote(self) -> Self {
        match self {
            CloudError::SessionExpired { status, message } => CloudError::Api { status, message },
            other => other,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, CloudError::Auth(_) | CloudError::NotLoggedIn)
    }
}

/// 关键字启发式：同时出现 session/token 与 expired/invalid
pub fn looks_like_session_expiry(message: &str) -> bool {
    let lower = message.to_lowercase();
    let subject = lower.contains("session") || lower.contains("token");
    let state = lower.contains("expired") || lower.contains("invalid");
    subject && state
}

/// 服务端错误体 `{"error": {"code", "description", "details"}}`，兼容 `message` 与纯字符串
pub fn extract_error_message(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    if let Some(s) = error.as_str() {
        return Some(s.to_string());
    }
    let pick = |key: &str| {
        error
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    match (pick("description"), pick("details")) {
        (Some(desc), Some(details)) if desc != details => Some(format!("{desc}: {details}")),
        (Some(desc), _) => Some(desc),
        (None, Some(details)) => Some(details),
        (None, None) => pick("message").or_else(|| pick("code")),
    }
}
