//! 按协议族路由：根据配置快照里的厂商选择 OpenAI 兼容或 Anthropic 适配器

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::events::EventSender;
use crate::llm::{
    AnthropicAdapter, ChatAdapter, ChatRequest, LlmTurn, OpenAiAdapter, Protocol, ProviderConfig,
};

/// 多厂商路由适配器；切换厂商只需替换 `ProviderSettings` 中的配置
#[derive(Clone)]
pub struct ProviderRouter {
    openai: OpenAiAdapter,
    anthropic: AnthropicAdapter,
}

impl ProviderRouter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            openai: OpenAiAdapter::new(timeout),
            anthropic: AnthropicAdapter::new(timeout),
        }
    }
}

#[async_trait]
impl ChatAdapter for ProviderRouter {
    async fn call(
        &self,
        provider: &ProviderConfig,
        request: ChatRequest<'_>,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> LlmTurn {
        tracing::debug!(
            provider = provider.kind.id(),
            model = %provider.model,
            turns = request.turns.len(),
            "dispatching model call"
        );
        match provider.kind.protocol() {
            Protocol::OpenAiChat => self.openai.call(provider, request, events, cancel).await,
            Protocol::AnthropicMessages => {
                self.anthropic.call(provider, request, events, cancel).await
            }
        }
    }
}
