//! 命令行交互：斜杠命令解析与过程事件渲染

use std::future::Future;
use std::io::Write;

use tokio::io::{AsyncBufRead, Lines};

use crate::engine::{ChatEngine, ChatEvent};
use crate::llm::OperatingMode;

/// REPL 斜杠命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// 清空对话
    New,
    Mode(OperatingMode),
    Model(String),
    InFlight,
    Usage,
    Help,
    Quit,
    Invalid(String),
}

impl ReplCommand {
    /// 非 `/` 开头的输入返回 None（作为普通消息发送）
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or("");
        let arg = parts.next();
        let cmd = match (name, arg) {
            ("new", _) => Self::New,
            ("mode", Some(m)) => match OperatingMode::parse(m) {
                Some(mode) => Self::Mode(mode),
                None => Self::Invalid(format!("unknown mode `{m}` (compact | full)")),
            },
            ("mode", None) => Self::Invalid("usage: /mode compact|full".into()),
            ("model", Some(id)) => Self::Model(id.to_string()),
            ("model", None) => Self::Invalid("usage: /model <id>".into()),
            ("inflight", _) => Self::InFlight,
            ("usage", _) => Self::Usage,
            ("help", _) | ("?", _) => Self::Help,
            ("quit", _) | ("exit", _) | ("q", _) => Self::Quit,
            (other, _) => Self::Invalid(format!("unknown command /{other}")),
        };
        Some(cmd)
    }
}

pub const HELP: &str = "\
/new              start a new conversation
/mode compact|full switch operating mode
/model <id>       switch model
/inflight         list tool calls still running
/usage            token usage so far
/quit             exit
Ctrl-C            stop the current answer";

/// 执行命令；返回 false 表示退出
pub fn apply(cmd: ReplCommand, engine: &mut ChatEngine) -> bool {
    match cmd {
        ReplCommand::New => {
            engine.clear();
            println!("(new conversation)");
        }
        ReplCommand::Mode(mode) => {
            engine.provider().update(|c| c.mode = mode);
            println!("(mode: {mode:?})");
        }
        ReplCommand::Model(id) => {
            println!("(model: {id})");
            engine.provider().update(|c| c.model = id);
        }
        ReplCommand::InFlight => {
            let calls = engine.in_flight().snapshot();
            if calls.is_empty() {
                println!("(no tool calls running)");
            }
            for c in calls {
                println!(
                    "  {} {} [{}s]",
                    c.name,
                    c.description,
                    c.started_at.elapsed().as_secs()
                );
            }
        }
        ReplCommand::Usage => {
            let (prompt, completion) = engine.usage();
            println!("(tokens: prompt {prompt}, completion {completion})");
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Quit => return false,
        ReplCommand::Invalid(msg) => println!("{msg}"),
    }
    true
}

/// 读取下一行输入；输入结束或 `interrupt` 先完成（提示符处的 Ctrl-C）时返回 None
pub async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

/// 把过程事件渲染到 stdout
pub fn render(event: &ChatEvent) {
    let mut out = std::io::stdout();
    match event {
        ChatEvent::TextDelta { text } => {
            let _ = write!(out, "{text}");
        }
        ChatEvent::ThinkingDelta { text } => {
            let _ = write!(out, "\x1b[2m{text}\x1b[0m");
        }
        ChatEvent::ToolStart { description, .. } => {
            let _ = writeln!(out, "\n  → {description}");
        }
        ChatEvent::ToolDone {
            name,
            ok,
            duration_ms,
            ..
        } => {
            let mark = if *ok { "✓" } else { "✗" };
            let _ = writeln!(out, "  {mark} {name} ({duration_ms} ms)");
        }
        ChatEvent::RoundUpdate { round, max_rounds } => {
            tracing::debug!(round, max_rounds, "round");
        }
        ChatEvent::Usage { .. } => {}
    }
    let _ = out.flush();
}
