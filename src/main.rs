//! Hive 命令行入口
//!
//! 用法：`hive [--session ID] [--stream] [--approve] [--history] <message>`
//! 读取配置、按配置选择后端（无 API Key 时使用 Mock）、执行一轮并打印答复，最后保存会话状态。

use std::sync::Arc;

use anyhow::{bail, Context};
use futures_util::StreamExt;
use hive::config::load_config;
use hive::llm::create_llm_from_config;
use hive::session::{FileSessionStore, SessionStore};
use hive::{observability, ChatState, OrchestratorBuilder};

struct CliArgs {
    session: String,
    stream: bool,
    approve: bool,
    history: bool,
    message: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut session = "default".to_string();
    let mut stream = false;
    let mut approve = false;
    let mut history = false;
    let mut words = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session" => session = args.next().context("--session requires an ID")?,
            "--stream" => stream = true,
            "--approve" => approve = true,
            "--history" => history = true,
            "-h" | "--help" => {
                println!("usage: hive [--session ID] [--stream] [--approve] [--history] <message>");
                std::process::exit(0);
            }
            _ => words.push(arg),
        }
    }

    if words.is_empty() {
        bail!("usage: hive [--session ID] [--stream] [--approve] [--history] <message>");
    }
    Ok(CliArgs {
        session,
        stream,
        approve,
        history,
        message: words.join(" "),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let config = load_config(None).context("Failed to load config")?;

    let llm = create_llm_from_config(&config);
    let orchestrator = OrchestratorBuilder::from_app_config(Arc::clone(&llm), &config)
        .with_builtin_tools()
        .build()
        .context("Failed to build orchestrator")?;

    let store = FileSessionStore::new(config.session.dir.clone());
    let mut seed: Option<ChatState> = store
        .load(&args.session)
        .await
        .context("Failed to load session")?;
    if args.approve {
        seed.get_or_insert_with(ChatState::default).human_approved = true;
    }

    let state = if args.stream {
        let mut snapshots = Box::pin(orchestrator.stream(&args.message, seed));
        let mut last = None;
        while let Some(snapshot) = snapshots.next().await {
            eprintln!("[{}]", snapshot.current_step);
            last = Some(snapshot);
        }
        last.context("stream produced no state")?
    } else {
        orchestrator.run(&args.message, seed).await
    };

    if let Some(response) = &state.final_response {
        println!("{response}");
    }
    if let Some(error) = &state.error_message {
        eprintln!("error: {error}");
    }

    store
        .save(&args.session, &state)
        .await
        .context("Failed to save session")?;

    tracing::debug!(session = %args.session, step = %state.current_step, "turn saved");

    if args.history {
        let skip = state.messages.len().saturating_sub(config.app.max_turns);
        println!("\n--- history ({} of {}) ---", state.messages.len() - skip, state.messages.len());
        for line in &state.messages[skip..] {
            println!("{line}");
        }
    }
    let (prompt, completion, total) = llm.token_usage();
    tracing::info!(prompt, completion, total, "token usage");
    Ok(())
}
