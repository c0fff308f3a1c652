//! 测试用适配器（无需网络）
//!
//! - `ScriptedLlm`：按脚本依次返回预设的 LlmTurn，脚本用尽后可由生成器继续产出
//! - `StallingLlm`：推送一个增量后挂起直到取消，用于验证中途取消

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::events::{send_event, ChatEvent, EventSender};
use crate::llm::{ChatAdapter, ChatRequest, LlmTurn, ProviderConfig};

type Generator = Arc<dyn Fn(usize) -> LlmTurn + Send + Sync>;

/// 脚本化适配器
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<VecDeque<LlmTurn>>>,
    fallback: Option<Generator>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLlm {
    pub fn new(turns: impl IntoIterator<Item = LlmTurn>) -> Self {
        Self {
            script: Arc::new(Mutex::new(turns.into_iter().collect())),
            ..Default::default()
        }
    }

    /// 脚本用尽后按调用序号生成结果（例如始终请求工具，用于验证轮次上限）
    pub fn repeating(f: impl Fn(usize) -> LlmTurn + Send + Sync + 'static) -> Self {
        Self {
            fallback: Some(Arc::new(f)),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatAdapter for ScriptedLlm {
    async fn call(
        &self,
        _provider: &ProviderConfig,
        _request: ChatRequest<'_>,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> LlmTurn {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return LlmTurn::Aborted;
        }
        let next = self.script.lock().await.pop_front();
        let turn = match (next, &self.fallback) {
            (Some(turn), _) => turn,
            (None, Some(f)) => f(n),
            (None, None) => LlmTurn::ProviderError("script exhausted".into()),
        };
        match &turn {
            LlmTurn::FinalText(text) | LlmTurn::ToolCallBatch { text, .. } if !text.is_empty() => {
                send_event(events, ChatEvent::TextDelta { text: text.clone() });
            }
            _ => {}
        }
        turn
    }
}

/// 推送一个增量后等待取消
#[derive(Clone, Default)]
pub struct StallingLlm;

#[async_trait]
impl ChatAdapter for StallingLlm {
    async fn call(
        &self,
        _provider: &ProviderConfig,
        _request: ChatRequest<'_>,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> LlmTurn {
        send_event(events, ChatEvent::TextDelta { text: "partial".into() });
        cancel.cancelled().await;
        LlmTurn::Aborted
    }
}
