//! 组件装配
//!
//! create_agent 按配置构建资源客户端（登录或登记凭据）、多厂商路由适配器与编排引擎，
//! 供 CLI 或其他前端使用。

use std::sync::Arc;
use std::time::Duration;

use crate::cloud::CloudClient;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::engine::ChatEngine;
use crate::llm::{ProviderRouter, ProviderSettings};
use crate::tools::ToolDispatcher;

/// 装配好的组件：引擎独占对话，资源客户端共享给分发表
pub struct AgentComponents {
    pub engine: ChatEngine,
    pub cloud: Arc<CloudClient>,
}

/// 按配置创建组件
///
/// 配置了口令时立即登录；网络不可达只记录警告并登记凭据（首次请求时懒登录），
/// 口令被拒绝则直接返回认证错误。
pub async fn create_agent(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let provider = cfg.llm.provider_config()?;
    let settings = cfg.agent.engine_settings()?;

    let mut cloud = CloudClient::new(&cfg.cloud.endpoint, cfg.cloud.client_options())?;
    let password = cfg.cloud.password.as_deref().filter(|p| !p.is_empty());
    match password {
        Some(password) => match cloud.login(&cfg.cloud.account, password).await {
            Ok(info) => {
                tracing::debug!(account = %info.account, "session established at startup");
            }
            Err(e) if e.is_auth() => return Err(AgentError::Auth(e.to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "initial login failed, will retry on first request");
                cloud = cloud.with_credentials(&cfg.cloud.account, password).await;
            }
        },
        None => tracing::warn!(
            "cloud.password is not set; resource calls will fail until credentials are configured"
        ),
    }
    let cloud = Arc::new(cloud);

    tracing::info!(
        provider = provider.kind.id(),
        model = %provider.model,
        mode = ?provider.mode,
        endpoint = %cloud.endpoint(),
        "agent ready"
    );

    let router = ProviderRouter::new(Duration::from_secs(cfg.llm.request_timeout_secs));
    let engine = ChatEngine::new(
        Arc::new(router),
        ToolDispatcher::new(cloud.clone()),
        ProviderSettings::new(provider),
        settings,
    );
    Ok(AgentComponents { engine, cloud })
}
