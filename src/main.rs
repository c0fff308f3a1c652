//! CloudPilot - 对话式云管理智能体
//!
//! 入口：初始化日志、加载配置、装配组件，在 stdin 上运行逐行交互；
//! Ctrl-C 在回答中停止当前回答，在提示符处退出。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use cloudpilot::agent::{create_agent, AgentComponents};
use cloudpilot::config::load_config;
use cloudpilot::core::ChatState;
use cloudpilot::observability;
use cloudpilot::repl::{apply, next_input, render, ReplCommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn prompt() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let AgentComponents { mut engine, cloud } =
        create_agent(&cfg).await.context("Failed to create agent")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            render(&ev);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            prompt();
            continue;
        }
        if let Some(cmd) = ReplCommand::parse(input) {
            if !apply(cmd, &mut engine) {
                break;
            }
            prompt();
            continue;
        }

        let cancel = engine.cancel_handle();
        let chat = engine.chat(input, Some(&event_tx));
        tokio::pin!(chat);
        let result = loop {
            tokio::select! {
                r = &mut chat => break r,
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
            }
        };
        match result {
            Ok(outcome) if outcome.state == ChatState::Done => println!(),
            Ok(outcome) => println!("\n{}", outcome.text),
            Err(e) => eprintln!("\nerror: {e}"),
        }
        prompt();
    }

    if let Err(e) = cloud.logout().await {
        tracing::warn!(error = %e, "logout failed");
    }
    Ok(())
}
