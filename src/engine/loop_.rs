//! 编排主循环
//!
//! 每次 `chat()`：Dispatching（调用当前适配器）→ AwaitingToolResults（并发执行工具）→ Dispatching …
//! 直到 Done / Aborted / TimedOut / RoundLimitReached / Failed。
//! 轮次上限与时间预算在每次进入 Dispatching 时检查；超出时返回说明文本而不是错误。
//! 取消不会中止已发出的工具调用（可能是启动虚拟机之类的非幂等操作），它们在后台完成，
//! 并可通过 in-flight 列表查看。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ChatOutcome, ChatState};
use crate::engine::events::{send_event, ChatEvent, EventSender};
use crate::engine::prompt::{compose, DEFAULT_SYSTEM_PROMPT};
use crate::engine::truncate::serialize_clipped;
use crate::llm::{ChatAdapter, ChatRequest, LlmTurn, ProviderSettings, ToolDefinition};
use crate::memory::{Conversation, ToolCall, Turn};
use crate::tools::{definitions, describe, ToolDispatcher, ToolOutcome};

/// 单次 chat 最大工具轮数
pub const DEFAULT_MAX_ROUNDS: usize = 100;
/// 单次 chat 的墙钟预算
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(300);

/// 取消时仍在执行的工具调用写回的结果
pub const ABORTED_RESULT: &str =
    "aborted before the result was received; the operation may still complete";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_rounds: usize,
    pub time_budget: Duration,
    pub system_prompt: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            time_budget: DEFAULT_TIME_BUDGET,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// 正在执行的工具调用
#[derive(Debug, Clone, Serialize)]
pub struct InFlightCall {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip)]
    pub started_at: Instant,
}

/// 在途工具调用登记表；取消后仍在后台运行的调用也在其中，直到完成
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<BTreeMap<String, InFlightCall>>>,
}

impl InFlightRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, InFlightCall>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, call: InFlightCall) {
        self.lock().insert(call.id.clone(), call);
    }

    fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn snapshot(&self) -> Vec<InFlightCall> {
        let mut calls: Vec<InFlightCall> = self.lock().values().cloned().collect();
        calls.sort_by_key(|c| c.started_at);
        calls
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// 取消当前 chat；每次 chat 开始时换新令牌
#[derive(Clone, Default)]
pub struct CancelHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    fn fresh(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }
}

/// 累计 token 用量（本引擎实例）
#[derive(Debug, Default)]
pub struct UsageTotals {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageTotals {
    fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion)
    pub fn get(&self) -> (u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 一轮工具执行的结果
struct ToolRound {
    aborted: bool,
    auth_failure: Option<String>,
}

/// 编排引擎：独占对话；不可重入（`chat` 取 `&mut self`）
pub struct ChatEngine {
    adapter: Arc<dyn ChatAdapter>,
    dispatcher: ToolDispatcher,
    provider: ProviderSettings,
    settings: EngineSettings,
    tools: Vec<ToolDefinition>,
    conversation: Conversation,
    cancel: CancelHandle,
    in_flight: InFlightRegistry,
    usage: Arc<UsageTotals>,
}

impl ChatEngine {
    pub fn new(
        adapter: Arc<dyn ChatAdapter>,
        dispatcher: ToolDispatcher,
        provider: ProviderSettings,
        settings: EngineSettings,
    ) -> Self {
        Self {
            adapter,
            dispatcher,
            provider,
            settings,
            tools: definitions(),
            conversation: Conversation::new(),
            cancel: CancelHandle::default(),
            in_flight: InFlightRegistry::default(),
            usage: Arc::new(UsageTotals::default()),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// 开始新对话
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn in_flight(&self) -> InFlightRegistry {
        self.in_flight.clone()
    }

    pub fn provider(&self) -> &ProviderSettings {
        &self.provider
    }

    pub fn usage(&self) -> (u64, u64) {
        self.usage.get()
    }

    /// 处理一条用户消息；软停止状态以文本返回，只有认证失败等才返回 Err
    pub async fn chat(
        &mut self,
        user_text: &str,
        events: Option<&EventSender>,
    ) -> Result<ChatOutcome, AgentError> {
        let cancel = self.cancel.fresh();
        let started = Instant::now();
        let (tx, forwarder) = self.spawn_forwarder(events);

        self.conversation.push_user(user_text);
        let result = self.drive(&tx, &cancel, started).await;
        drop(tx);

        match &result {
            Ok(outcome) => {
                if outcome.state.is_soft_stop() && outcome.state != ChatState::Failed {
                    self.conversation.push_assistant(outcome.text.clone());
                }
                tracing::info!(
                    state = ?outcome.state,
                    rounds = outcome.rounds,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "chat finished"
                );
            }
            Err(e) => tracing::warn!(error = %e, "chat failed"),
        }

        // 取消后后台工具仍持有事件发送端，不等待转发结束
        let aborted = matches!(&result, Ok(o) if o.state == ChatState::Aborted);
        if !aborted {
            let _ = forwarder.await;
        }
        result
    }

    /// 事件经内部通道转发给调用方，途中累计用量
    fn spawn_forwarder(&self, caller: Option<&EventSender>) -> (EventSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChatEvent>();
        let caller = caller.cloned();
        let usage = self.usage.clone();
        let handle = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let ChatEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                } = &ev
                {
                    usage.add(*prompt_tokens, *completion_tokens);
                }
                send_event(caller.as_ref(), ev);
            }
        });
        (tx, handle)
    }

    async fn drive(
        &mut self,
        tx: &EventSender,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ChatOutcome, AgentError> {
        let mut round = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Ok(ChatOutcome::aborted(round));
            }
            if round >= self.settings.max_rounds {
                tracing::warn!(round, "round limit reached");
                return Ok(ChatOutcome::round_limit(round));
            }
            if started.elapsed() >= self.settings.time_budget {
                tracing::warn!(round, "time budget exhausted");
                return Ok(ChatOutcome::timed_out(
                    round,
                    self.settings.time_budget.as_secs(),
                ));
            }

            send_event(
                Some(tx),
                ChatEvent::RoundUpdate {
                    round: round + 1,
                    max_rounds: self.settings.max_rounds,
                },
            );

            let provider = self.provider.snapshot();
            let system_prompt = compose(&self.settings.system_prompt, provider.mode);
            let request = ChatRequest {
                system_prompt: &system_prompt,
                turns: self.conversation.turns(),
                tools: &self.tools,
            };
            let remaining = self.settings.time_budget.saturating_sub(started.elapsed());
            let turn = tokio::select! {
                biased;
                _ = cancel.cancelled() => LlmTurn::Aborted,
                _ = tokio::time::sleep(remaining) => {
                    tracing::warn!(round, "time budget exhausted while waiting for the model");
                    return Ok(ChatOutcome::timed_out(
                        round,
                        self.settings.time_budget.as_secs(),
                    ));
                }
                turn = self.adapter.call(&provider, request, Some(tx), cancel) => turn,
            };

            match turn {
                LlmTurn::Aborted => return Ok(ChatOutcome::aborted(round)),
                LlmTurn::ProviderError(message) => {
                    tracing::warn!(round, error = %message, "provider error ended the round");
                    return Ok(ChatOutcome::failed(round, &message));
                }
                LlmTurn::FinalText(text) => {
                    self.conversation.push_assistant(text.clone());
                    return Ok(ChatOutcome {
                        state: ChatState::Done,
                        text,
                        rounds: round,
                    });
                }
                LlmTurn::ToolCallBatch { text, calls } => {
                    if cancel.is_cancelled() {
                        return Ok(ChatOutcome::aborted(round));
                    }
                    tracing::info!(round = round + 1, calls = calls.len(), "executing tool calls");
                    self.conversation.push(Turn::ToolCalls {
                        text,
                        calls: calls.clone(),
                    });
                    let outcome = self.run_tools(&calls, tx, cancel).await;
                    if outcome.aborted {
                        return Ok(ChatOutcome::aborted(round));
                    }
                    if let Some(message) = outcome.auth_failure {
                        return Err(AgentError::Auth(message));
                    }
                    round += 1;
                }
            }
        }
    }

    /// 并发执行一批调用，按调用顺序写回结果；取消时未完成的调用写入占位结果
    async fn run_tools(
        &mut self,
        calls: &[ToolCall],
        tx: &EventSender,
        cancel: &CancellationToken,
    ) -> ToolRound {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, ToolOutcome)>();

        for (index, call) in calls.iter().enumerate() {
            let description = describe(&call.name, &call.arguments);
            send_event(
                Some(tx),
                ChatEvent::ToolStart {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    description: description.clone(),
                },
            );
            self.in_flight.insert(InFlightCall {
                id: call.id.clone(),
                name: call.name.clone(),
                description,
                started_at: Instant::now(),
            });

            let dispatcher = self.dispatcher.clone();
            let registry = self.in_flight.clone();
            let events = tx.clone();
            let done = done_tx.clone();
            let call = call.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let outcome = dispatcher.dispatch(&call).await;
                registry.remove(&call.id);
                let ok = !outcome.is_error;
                let _ = done.send((index, outcome));
                send_event(
                    Some(&events),
                    ChatEvent::ToolDone {
                        id: call.id,
                        name: call.name,
                        ok,
                        duration_ms: started.elapsed().as_millis() as u64,
                    },
                );
            });
        }
        drop(done_tx);

        let mut slots: Vec<Option<ToolOutcome>> = vec![None; calls.len()];
        let mut remaining = calls.len();
        let mut aborted = false;
        while remaining > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    aborted = true;
                    break;
                }
                msg = done_rx.recv() => match msg {
                    Some((index, outcome)) => {
                        slots[index] = Some(outcome);
                        remaining -= 1;
                    }
                    None => break,
                },
            }
        }
        if aborted {
            while let Ok((index, outcome)) = done_rx.try_recv() {
                slots[index] = Some(outcome);
            }
            tracing::info!(
                pending = slots.iter().filter(|s| s.is_none()).count(),
                "cancelled while tools were running; pending calls continue in background"
            );
        }

        let budget = self.provider.snapshot().mode.result_budget();
        let mut auth_failure = None;
        for (call, slot) in calls.iter().zip(slots) {
            let (payload, is_error) = match slot {
                Some(outcome) => {
                    if auth_failure.is_none() {
                        auth_failure = outcome.auth_failure;
                    }
                    (outcome.payload, outcome.is_error)
                }
                None if aborted => (json!({ "error": ABORTED_RESULT }), true),
                None => (json!({ "error": "tool task ended without a result" }), true),
            };
            self.conversation.push(Turn::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: serialize_clipped(&payload, budget),
                is_error,
            });
        }

        ToolRound {
            aborted,
            auth_failure,
        }
    }
}
