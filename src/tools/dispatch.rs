//! 工具分发
//!
//! (name, arguments) → 恰好一次 ResourceApi 调用。分发从不返回 Err：未知工具、参数错误、
//! 底层调用失败都变成 `{error: message}` 载荷，保证并发扇出时每个调用都有结果。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::cloud::{normalize_path, CloudError, QueryParams, ResourceApi};
use crate::memory::ToolCall;
use crate::tools::kind::{
    ActionArgs, CreateArgs, DeleteArgs, GetArgs, QueryArgs, UpdateArgs, ZqlArgs,
};
use crate::tools::CloudTool;

#[derive(Error, Debug)]
enum DispatchError {
    #[error("unknown tool {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// 单次工具调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    /// 成功时为调用返回值，失败时为 `{"error": message}`
    pub payload: Value,
    pub is_error: bool,
    /// 会话无法恢复（重登录失败）时的错误信息；引擎据此结束本次 chat
    pub auth_failure: Option<String>,
}

/// 工具分发表
#[derive(Clone)]
pub struct ToolDispatcher {
    api: Arc<dyn ResourceApi>,
}

impl ToolDispatcher {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self { api }
    }

    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let start = Instant::now();
        let result = match CloudTool::from_name(&call.name) {
            Some(tool) => self.run(tool, &call.arguments).await,
            None => Err(DispatchError::UnknownTool(call.name.clone())),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(DispatchError::UnknownTool(_)) => "unknown_tool",
            Err(DispatchError::InvalidArguments { .. }) => "invalid_arguments",
            Err(DispatchError::Cloud(_)) => "error",
        };
        let audit = json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(payload) => ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                payload,
                is_error: false,
                auth_failure: None,
            },
            Err(e) => {
                let auth_failure = match &e {
                    DispatchError::Cloud(c) if c.is_auth() => Some(c.to_string()),
                    _ => None,
                };
                ToolOutcome {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    payload: json!({ "error": e.to_string() }),
                    is_error: true,
                    auth_failure,
                }
            }
        }
    }

    async fn run(&self, tool: CloudTool, args: &Value) -> Result<Value, DispatchError> {
        match tool {
            CloudTool::Query => {
                let a: QueryArgs = parse(tool, args)?;
                let mut params = QueryParams::new().conditions(a.conditions);
                if let Some(limit) = a.limit {
                    params = params.limit(limit);
                }
                if let Some(offset) = a.offset {
                    params = params.offset(offset);
                }
                if let Some(field) = a.sort_by.filter(|s| !s.trim().is_empty()) {
                    params = params.sort(field, a.sort_direction.unwrap_or_default());
                }
                let result = self.api.query(&normalize_path(&a.path), &params).await?;
                Ok(serde_json::to_value(result).unwrap_or(Value::Null))
            }
            CloudTool::Get => {
                let a: GetArgs = parse(tool, args)?;
                let id = required(tool, "uuid", &a.uuid)?;
                Ok(self.api.get(&normalize_path(&a.path), id).await?)
            }
            CloudTool::Create => {
                let a: CreateArgs = parse(tool, args)?;
                Ok(self
                    .api
                    .create(&normalize_path(&a.path), &Value::Object(a.body))
                    .await?)
            }
            CloudTool::Update => {
                let a: UpdateArgs = parse(tool, args)?;
                let id = required(tool, "uuid", &a.uuid)?;
                Ok(self
                    .api
                    .update(&normalize_path(&a.path), id, &Value::Object(a.body))
                    .await?)
            }
            CloudTool::Delete => {
                let a: DeleteArgs = parse(tool, args)?;
                let id = required(tool, "uuid", &a.uuid)?;
                Ok(self
                    .api
                    .remove(&normalize_path(&a.path), id, a.mode.unwrap_or_default())
                    .await?)
            }
            CloudTool::Action => {
                let a: ActionArgs = parse(tool, args)?;
                let id = required(tool, "uuid", &a.uuid)?;
                if a.action.len() != 1 {
                    return Err(DispatchError::InvalidArguments {
                        tool: tool.name(),
                        message: format!(
                            "`action` must have exactly one top-level key, got {}",
                            a.action.len()
                        ),
                    });
                }
                Ok(self
                    .api
                    .action(&normalize_path(&a.path), id, &Value::Object(a.action))
                    .await?)
            }
            CloudTool::Zql => {
                let a: ZqlArgs = parse(tool, args)?;
                let zql = required(tool, "zql", &a.zql)?;
                Ok(self.api.structured_query(zql).await?)
            }
        }
    }
}

fn parse<T: DeserializeOwned>(tool: CloudTool, args: &Value) -> Result<T, DispatchError> {
    serde_json::from_value(args.clone()).map_err(|e| DispatchError::InvalidArguments {
        tool: tool.name(),
        message: e.to_string(),
    })
}

fn required<'a>(tool: CloudTool, field: &str, value: &'a str) -> Result<&'a str, DispatchError> {
    let v = value.trim();
    if v.is_empty() {
        Err(DispatchError::InvalidArguments {
            tool: tool.name(),
            message: format!("`{field}` must not be empty"),
        })
    } else {
        Ok(v)
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{DeleteMode, QueryResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 记录调用并按路径返回固定结果的假资源 API
    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingApi {
        fn record(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl ResourceApi for RecordingApi {
        async fn query(&self, path: &str, params: &QueryParams) -> Result<QueryResult, CloudError> {
            self.record(format!("query {path} {:?}", params.to_pairs()));
            Ok(QueryResult {
                items: vec![json!({"uuid": "h1"})],
                total: Some(1),
            })
        }

        async fn get(&self, path: &str, id: &str) -> Result<Value, CloudError> {
            self.record(format!("get {path} {id}"));
            if id == "missing" {
                return Err(CloudError::Api {
                    status: 404,
                    message: "resource not found".into(),
                });
            }
            if id == "locked-out" {
                return Err(CloudError::Auth("wrong password".into()));
            }
            Ok(json!({"uuid": id}))
        }

        async fn create(&self, path: &str, body: &Value) -> Result<Value, CloudError> {
            self.record(format!("create {path} {body}"));
            Ok(body.clone())
        }

        async fn update(&self, path: &str, id: &str, body: &Value) -> Result<Value, CloudError> {
            self.record(format!("update {path} {id} {body}"));
            Ok(body.clone())
        }

        async fn remove(&self, path: &str, id: &str, mode: DeleteMode) -> Result<Value, CloudError> {
            self.record(format!("remove {path} {id} {}", mode.as_str()));
            Ok(json!({}))
        }

        async fn action(&self, path: &str, id: &str, action: &Value) -> Result<Value, CloudError> {
            self.record(format!("action {path} {id} {action}"));
            Ok(json!({"inventory": {"uuid": id, "state": "Running"}}))
        }

        async fn structured_query(&self, query: &str) -> Result<Value, CloudError> {
            self.record(format!("zql {query}"));
            Ok(json!({"results": [{"total": 3}]}))
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    fn dispatcher() -> (Arc<RecordingApi>, ToolDispatcher) {
        let api = Arc::new(RecordingApi::default());
        (api.clone(), ToolDispatcher::new(api))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_payload() {
        let (_, d) = dispatcher();
        let out = d.dispatch(&call("format_disk", json!({}))).await;
        assert!(out.is_error);
        assert_eq!(out.payload, json!({"error": "unknown tool format_disk"}));
        assert_eq!(out.auth_failure, None);
    }

    #[tokio::test]
    async fn test_query_normalizes_path_and_builds_params() {
        let (api, d) = dispatcher();
        let out = d
            .dispatch(&call(
                "query_resources",
                json!({"path": "vm-instances", "conditions": ["state=Running"], "limit": 5,
                       "sort_by": "createDate", "sort_direction": "desc"}),
            ))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.payload["total"], 1);
        let calls = api.calls.lock().unwrap();
        assert!(calls[0].starts_with("query /zstack/v1/vm-instances"));
        assert!(calls[0].contains("\"-createDate\""));
    }

    #[tokio::test]
    async fn test_api_error_becomes_error_payload() {
        let (_, d) = dispatcher();
        let out = d
            .dispatch(&call("get_resource", json!({"path": "hosts", "uuid": "missing"})))
            .await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("resource not found"));
        assert_eq!(out.auth_failure, None);
    }

    #[tokio::test]
    async fn test_auth_failure_is_flagged() {
        let (_, d) = dispatcher();
        let out = d
            .dispatch(&call("get_resource", json!({"path": "hosts", "uuid": "locked-out"})))
            .await;
        assert!(out.is_error);
        assert!(out.auth_failure.unwrap().contains("wrong password"));
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (api, d) = dispatcher();
        let out = d.dispatch(&call("get_resource", json!({"path": "hosts"}))).await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("invalid arguments"));

        let out = d
            .dispatch(&call(
                "resource_action",
                json!({"path": "vm-instances", "uuid": "v", "action": {"a": {}, "b": {}}}),
            ))
            .await;
        assert!(out.is_error);
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutating_verbs_route_to_client() {
        let (api, d) = dispatcher();
        d.dispatch(&call(
            "resource_action",
            json!({"path": "/zstack/v1/vm-instances", "uuid": "v1", "action": {"startVmInstance": {}}}),
        ))
        .await;
        d.dispatch(&call(
            "delete_resource",
            json!({"path": "vm-instances", "uuid": "v1", "mode": "Enforcing"}),
        ))
        .await;
        d.dispatch(&call("zql_query", json!({"zql": "count host"}))).await;
        let calls = api.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            "action /zstack/v1/vm-instances v1 {\"startVmInstance\":{}}"
        );
        assert_eq!(calls[1], "remove /zstack/v1/vm-instances v1 Enforcing");
        assert_eq!(calls[2], "zql count host");
    }
}
