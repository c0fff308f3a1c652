//! 通用资源 REST 客户端
//!
//! 登录 / 登出、集合查询、单实体读取、增删改、动作端点与 ZQL 透传。
//! 每个非登录请求都经过 `execute`：命中 SessionExpired 时静默重登录一次并重试同一请求；
//! 202 + location 的异步任务在此轮询到结束。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use crate::cloud::path::{normalize_path, API_PREFIX};
use crate::cloud::session::{Credentials, SessionInfo, SessionStore};
use crate::cloud::{CloudError, QueryParams};

/// 删除模式：Permissive 在有依赖时拒绝，Enforcing 强制级联
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub enum DeleteMode {
    #[default]
    Permissive,
    Enforcing,
}

impl DeleteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteMode::Permissive => "Permissive",
            DeleteMode::Enforcing => "Enforcing",
        }
    }
}

/// 集合查询结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// 工具分发依赖的资源访问接口（CloudClient 实现；测试中可替换）
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn query(&self, path: &str, params: &QueryParams) -> Result<QueryResult, CloudError>;

    async fn get(&self, path: &str, id: &str) -> Result<Value, CloudError>;

    async fn create(&self, path: &str, body: &Value) -> Result<Value, CloudError>;

    async fn update(&self, path: &str, id: &str, body: &Value) -> Result<Value, CloudError>;

    async fn remove(&self, path: &str, id: &str, mode: DeleteMode) -> Result<Value, CloudError>;

    /// 非 CRUD 的命令式操作（启动 / 停止 / 挂载等），body 唯一的顶层键即动作名
    async fn action(&self, path: &str, id: &str, action: &Value) -> Result<Value, CloudError>;

    /// ZQL 透传，不做客户端解析
    async fn structured_query(&self, query: &str) -> Result<Value, CloudError>;
}

/// 客户端参数（来自配置 [cloud] 段）
#[derive(Debug, Clone)]
pub struct CloudClientOptions {
    pub request_timeout: Duration,
    pub job_poll_interval: Duration,
    pub job_timeout: Duration,
}

impl Default for CloudClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            job_poll_interval: Duration::from_millis(500),
            job_timeout: Duration::from_secs(120),
        }
    }
}

/// 资源客户端：持有 HTTP 客户端、端点与共享会话
pub struct CloudClient {
    http: Client,
    endpoint: String,
    session: SessionStore,
    options: CloudClientOptions,
}

impl CloudClient {
    pub fn new(endpoint: &str, options: CloudClientOptions) -> Result<Self, CloudError> {
        let http = Client::builder().timeout(options.request_timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            session: SessionStore::new(),
            options,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// 只登记凭据，首次请求时再懒登录
    pub async fn with_credentials(self, account: &str, secret: &str) -> Self {
        self.session
            .set_credentials(Credentials::new(account, secret))
            .await;
        self
    }

    /// 登录：口令以 SHA-512 摘要提交；成功后缓存凭据供静默重登录
    pub async fn login(&self, account: &str, secret: &str) -> Result<SessionInfo, CloudError> {
        let creds = Credentials::new(account, secret);
        let token = self.login_raw(creds.clone()).await?;
        self.session.set_credentials(creds).await;
        let info = self.session.establish(token, account.to_string()).await;
        tracing::info!(account = %account, endpoint = %self.endpoint, "logged in");
        Ok(info)
    }

    /// 登出：删除服务端会话并丢弃本地凭据
    pub async fn logout(&self) -> Result<(), CloudError> {
        let Some(token) = self.session.token().await else {
            self.session.forget().await;
            return Ok(());
        };
        let url = format!("{}{}/accounts/sessions/{}", self.endpoint, API_PREFIX, token);
        let resp = self.http.delete(url).send().await;
        self.session.forget().await;
        let resp = resp?;
        let status = resp.status();
        if !status.is_success() {
            let body = read_json(resp).await?;
            return Err(CloudError::from_response(status.as_u16(), &body).demote());
        }
        Ok(())
    }

    async fn login_raw(&self, creds: Credentials) -> Result<String, CloudError> {
        let url = format!("{}{}/accounts/login", self.endpoint, API_PREFIX);
        let body = json!({
            "logInByAccount": {
                "accountName": creds.account,
                "password": creds.password_digest,
            }
        });
        let resp = self.http.put(url).json(&body).send().await?;
        let status = resp.status();
        let value = read_json(resp).await?;
        if !status.is_success() {
            let message = crate::cloud::error::extract_error_message(&value)
                .unwrap_or_else(|| format!("login failed with status {status}"));
            return Err(CloudError::Auth(message));
        }
        value
            .pointer("/inventory/uuid")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| CloudError::Auth("login response carries no session uuid".to_string()))
    }

    /// 当前令牌；尚未登录但有凭据时懒登录
    async fn current_token(&self) -> Result<String, CloudError> {
        if let Some(token) = self.session.token().await {
            return Ok(token);
        }
        self.session
            .renew(None, |creds| self.login_raw(creds))
            .await
            .map_err(auth_failure)
    }

    /// 资源 URL；id 作为单个路径段转义，`/`、`?`、`#` 不会改变请求目标
    fn url(&self, path: &str, id: Option<&str>, suffix: Option<&str>) -> Result<String, CloudError> {
        let base = format!("{}{}", self.endpoint, normalize_path(path));
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| CloudError::InvalidRequest(format!("bad resource URL {base}: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CloudError::InvalidRequest(format!("bad resource URL {base}")))?;
            segments.pop_if_empty();
            if let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) {
                segments.push(id);
            }
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url.into())
    }

    /// 带会话头发送请求；会话失效时单飞重登录并重试一次，重试仍失效则降级为 ApiError
    async fn execute(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, CloudError> {
        let token = self.current_token().await?;
        match self.send(&method, url, query, body, &token).await {
            Err(CloudError::SessionExpired { status, message }) => {
                tracing::warn!(status, message = %message, "session expired, re-login and retry once");
                let fresh = self
                    .session
                    .renew(Some(&token), |creds| self.login_raw(creds))
                    .await
                    .map_err(auth_failure)?;
                self.send(&method, url, query, body, &fresh)
                    .await
                    .map_err(CloudError::demote)
            }
            other => other,
        }
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<Value, CloudError> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("OAuth {token}"));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        tracing::debug!(method = %method, url = %url, "resource request");
        let resp = req.send().await?;
        let status = resp.status();
        let value = read_json(resp).await?;

        if status == StatusCode::ACCEPTED {
            if let Some(location) = value.get("location").and_then(|v| v.as_str()) {
                return self.poll_job(location, token).await;
            }
        }
        if !status.is_success() {
            return Err(CloudError::from_response(status.as_u16(), &value));
        }
        Ok(value)
    }

    /// 轮询异步任务结果。轮询阶段的会话失效不触发重试，避免重复提交变更
    async fn poll_job(&self, location: &str, token: &str) -> Result<Value, CloudError> {
        let url = if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.endpoint, location.trim_start_matches('/'))
        };
        let deadline = Instant::now() + self.options.job_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(CloudError::JobTimeout(url));
            }
            sleep(self.options.job_poll_interval).await;
            let resp = self
                .http
                .get(&url)
                .header(AUTHORIZATION, format!("OAuth {token}"))
                .send()
                .await?;
            let status = resp.status();
            let value = read_json(resp).await?;
            if status == StatusCode::ACCEPTED {
                continue;
            }
            if !status.is_success() {
                return Err(CloudError::from_response(status.as_u16(), &value).demote());
            }
            return Ok(value);
        }
    }
}

/// 重登录失败统一表现为认证错误
fn auth_failure(err: CloudError) -> CloudError {
    match err {
        CloudError::Auth(_) => err,
        CloudError::NotLoggedIn => {
            CloudError::Auth("session expired and no stored credentials".to_string())
        }
        other => CloudError::Auth(format!("re-login failed: {other}")),
    }
}

/// 读取响应体：空体视为 `{}`；错误响应的非 JSON 正文包装为 `{"error": text}`
async fn read_json(resp: reqwest::Response) -> Result<Value, CloudError> {
    let status = resp.status();
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Ok(json!({ "error": text.trim() })),
        Err(e) => Err(CloudError::InvalidResponse(format!("{e}: {}", preview(&text)))),
    }
}

fn preview(s: &str) -> String {
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 单实体响应兼容两种信封：`{"inventory": x}` 与 `{"inventories": [x]}`
pub fn normalize_single(value: Value, what: &str) -> Result<Value, CloudError> {
    if let Some(entity) = value.get("inventory").filter(|v| v.is_object()) {
        return Ok(entity.clone());
    }
    match value.get("inventories").and_then(|v| v.as_array()) {
        Some(items) if items.len() == 1 => Ok(items[0].clone()),
        Some(items) if items.is_empty() => Err(CloudError::Api {
            status: 404,
            message: format!("{what} not found"),
        }),
        _ => Ok(value),
    }
}

#[async_trait]
impl ResourceApi for CloudClient {
    async fn query(&self, path: &str, params: &QueryParams) -> Result<QueryResult, CloudError> {
        let url = self.url(path, None, None)?;
        let value = self.execute(Method::GET, &url, &params.to_pairs(), None).await?;
        let items = value
            .get("inventories")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let total = value.get("total").and_then(|v| v.as_u64());
        Ok(QueryResult { items, total })
    }

    async fn get(&self, path: &str, id: &str) -> Result<Value, CloudError> {
        let url = self.url(path, Some(id), None)?;
        let value = self.execute(Method::GET, &url, &[], None).await?;
        normalize_single(value, &format!("{}/{}", normalize_path(path), id))
    }

    async fn create(&self, path: &str, body: &Value) -> Result<Value, CloudError> {
        let url = self.url(path, None, None)?;
        self.execute(Method::POST, &url, &[], Some(body)).await
    }

    async fn update(&self, path: &str, id: &str, body: &Value) -> Result<Value, CloudError> {
        let url = self.url(path, Some(id), None)?;
        self.execute(Method::PUT, &url, &[], Some(body)).await
    }

    async fn remove(&self, path: &str, id: &str, mode: DeleteMode) -> Result<Value, CloudError> {
        let url = self.url(path, Some(id), None)?;
        let query = [("deleteMode".to_string(), mode.as_str().to_string())];
        self.execute(Method::DELETE, &url, &query, None).await
    }

    async fn action(&self, path: &str, id: &str, action: &Value) -> Result<Value, CloudError> {
        let url = self.url(path, Some(id), Some("actions"))?;
        self.execute(Method::PUT, &url, &[], Some(action)).await
    }

    async fn structured_query(&self, query: &str) -> Result<Value, CloudError> {
        let url = self.url("zql", None, None)?;
        let params = [("zql".to_string(), query.to_string())];
        self.execute(Method::GET, &url, &params, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SESSION: &str = "3b7f2c1d0a9e4b5c8d7e6f5a4b3c2d1e";

    fn options() -> CloudClientOptions {
        CloudClientOptions {
            request_timeout: Duration::from_secs(5),
            job_poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(2),
        }
    }

    async fn mount_login(server: &MockServer, token: &str) {
        Mock::given(method("PUT"))
            .and(path("/zstack/v1/accounts/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"inventory": {"uuid": token}})),
            )
            .mount(server)
            .await;
    }

    async fn logged_in(server: &MockServer) -> CloudClient {
        mount_login(server, SESSION).await;
        let client = CloudClient::new(&server.uri(), options()).unwrap();
        client.login("admin", "password").await.unwrap();
        client
    }

    async fn login_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/zstack/v1/accounts/login")
            .count()
    }

    #[tokio::test]
    async fn test_login_sends_sha512_digest() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/zstack/v1/accounts/login"))
            .and(body_json(json!({
                "logInByAccount": {
                    "accountName": "admin",
                    "password": crate::cloud::session::digest_password("password"),
                }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"inventory": {"uuid": SESSION}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudClient::new(&server.uri(), options()).unwrap();
        let info = client.login("admin", "password").await.unwrap();
        assert_eq!(info.token, SESSION);
        assert_eq!(client.session().token().await.as_deref(), Some(SESSION));
    }

    #[tokio::test]
    async fn test_login_without_session_uuid_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/zstack/v1/accounts/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inventory": {}})))
            .mount(&server)
            .await;
        let client = CloudClient::new(&server.uri(), options()).unwrap();
        let err = client.login("admin", "password").await.unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
        assert!(client.session().credentials().await.is_none());
    }

    #[tokio::test]
    async fn test_query_uses_oauth_header_and_params() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/vm-instances"))
            .and(header("Authorization", format!("OAuth {SESSION}").as_str()))
            .and(query_param("limit", "5"))
            .and(query_param("start", "0"))
            .and(query_param("q", "state=Running"))
            .and(query_param("sort", "-createDate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inventories": [{"uuid": "a"}, {"uuid": "b"}]
            })))
            .mount(&server)
            .await;

        let params = QueryParams::new()
            .condition("state=Running")
            .limit(5)
            .sort("createDate", crate::cloud::SortDirection::Desc);
        let result = client.query("vm-instances", &params).await.unwrap();
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.total, None);
    }

    #[tokio::test]
    async fn test_session_expired_relogins_once_and_retries() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        assert_eq!(login_requests(&server).await, 1);

        Mock::given(method("GET"))
            .and(path("/zstack/v1/vm-instances"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"details": "session expired"}})),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/vm-instances"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"inventories": [{"uuid": "x"}]})),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let params = QueryParams::new().limit(5).offset(0);
        let result = client.query("vm-instances", &params).await.unwrap();
        assert_eq!(result.items, vec![json!({"uuid": "x"})]);
        assert_eq!(login_requests(&server).await, 2);
        assert_eq!(client.session().relogin_count(), 1);
    }

    #[tokio::test]
    async fn test_second_expiry_is_demoted_to_api_error() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/hosts"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"details": "session expired"}})),
            )
            .mount(&server)
            .await;

        let err = client.query("hosts", &QueryParams::new()).await.unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 401, .. }));
        assert_eq!(login_requests(&server).await, 2);
    }

    #[tokio::test]
    async fn test_get_normalizes_both_envelopes() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/vm-instances/x"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"inventories": [{"uuid": "x"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/volumes/x"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"inventory": {"uuid": "x"}})),
            )
            .mount(&server)
            .await;

        let a = client.get("vm-instances", "x").await.unwrap();
        let b = client.get("/v1/volumes", "x").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, json!({"uuid": "x"}));
    }

    #[test]
    fn test_normalize_single_empty_collection_is_not_found() {
        let err = normalize_single(json!({"inventories": []}), "/zstack/v1/hosts/h").unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_action_polls_async_job() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        let location = format!("{}/zstack/v1/api-jobs/job-1", server.uri());
        Mock::given(method("PUT"))
            .and(path("/zstack/v1/vm-instances/vm-1/actions"))
            .and(body_json(json!({"startVmInstance": {}})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"location": location})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/api-jobs/job-1"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({})))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/api-jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inventory": {"uuid": "vm-1", "state": "Running"}
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let out = client
            .action("vm-instances", "vm-1", &json!({"startVmInstance": {}}))
            .await
            .unwrap();
        assert_eq!(out["inventory"]["state"], "Running");
    }

    #[tokio::test]
    async fn test_id_is_escaped_as_one_path_segment() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/vm-instances/a%2Fb%3Fc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"inventory": {"uuid": "a/b?c"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let vm = client.get("vm-instances", "a/b?c").await.unwrap();
        assert_eq!(vm["uuid"], "a/b?c");
        let requests = server.received_requests().await.unwrap_or_default();
        let get = requests.iter().find(|r| r.method.as_str() == "GET").unwrap();
        assert_eq!(get.url.query(), None);
    }

    #[tokio::test]
    async fn test_remove_and_structured_query() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/zstack/v1/volumes/v-1"))
            .and(query_param("deleteMode", "Enforcing"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/zql"))
            .and(query_param("zql", "count vminstance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [{"total": 7}]})))
            .mount(&server)
            .await;

        let ack = client.remove("volumes", "v-1", DeleteMode::Enforcing).await.unwrap();
        assert_eq!(ack, json!({}));
        let out = client.structured_query("count vminstance").await.unwrap();
        assert_eq!(out["results"][0]["total"], 7);
    }

    #[tokio::test]
    async fn test_lazy_login_with_credentials() {
        let server = MockServer::start().await;
        mount_login(&server, SESSION).await;
        Mock::given(method("GET"))
            .and(path("/zstack/v1/zones"))
            .and(header("Authorization", format!("OAuth {SESSION}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inventories": []})))
            .mount(&server)
            .await;
        let client = CloudClient::new(&server.uri(), options())
            .unwrap()
            .with_credentials("admin", "password")
            .await;
        let result = client.query("zones", &QueryParams::new()).await.unwrap();
        assert!(result.items.is_empty());
        assert_eq!(client.session().relogin_count(), 0);
    }

    #[tokio::test]
    async fn test_request_without_session_or_credentials() {
        let server = MockServer::start().await;
        let client = CloudClient::new(&server.uri(), options()).unwrap();
        let err = client.get("zones", "z").await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/zstack/v1/vm-instances"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "SYS.1007", "description": "invalid argument", "details": "name is required"}
            })))
            .mount(&server)
            .await;
        let err = client.create("vm-instances", &json!({"params": {}})).await.unwrap_err();
        match err {
            CloudError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("name is required"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
