use anyhow::Result;
use clap::Parser;
use devplan_rs::cli::{Args, Command};
use devplan_rs::generator::workflow::{LaunchRequest, launch};
use devplan_rs::config::SessionBackend;
use devplan_rs::session::open_store;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, reload, util::SubscriberInitExt};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cli_verbose = args.verbose;
    // 配置文件加载完成前先按命令行参数初始化，之后再合并配置中的 verbose
    let (filter, filter_handle) =
        reload::Layer::new(env_filter(if cli_verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = args.command()?;
    let config = args.into_config()?;
    if config.verbose
        && !cli_verbose
        && let Err(e) = filter_handle.reload(env_filter(config.log_level()))
    {
        warn!(error = %e, "⚠️ 无法调整日志级别");
    }
    let store = open_store(&config.session);

    let request = match command {
        Command::ListSessions => {
            let sessions = store.list().await?;
            if sessions.is_empty() {
                match config.session.backend {
                    SessionBackend::File => {
                        println!("No saved sessions in {}", config.session.dir.display())
                    }
                    SessionBackend::Memory => println!("No saved sessions in memory"),
                }
            }
            for session in sessions {
                println!(
                    "{}  {:<11}  {:<26}  round {:>3}  docs {:>2}  {}  {}",
                    session.session_id,
                    session.status.to_string(),
                    session.stage.to_string(),
                    session.round,
                    session.document_count,
                    session.saved_at.format("%Y-%m-%d %H:%M"),
                    session.query
                );
            }
            return Ok(());
        }
        Command::DeleteSession(session_id) => {
            if store.delete(&session_id).await? {
                println!("🗑️ Deleted session {}", session_id);
            } else {
                println!("Session {} not found", session_id);
            }
            return Ok(());
        }
        Command::Resume(session_id) => LaunchRequest::Resume(session_id),
        Command::Run(prompt) => LaunchRequest::New(prompt),
    };

    config.validate()?;
    info!(
        planner = %config.planner.model,
        writer = %config.writer.model,
        output = %config.output_path.display(),
        "🚀 devplan-rs starting"
    );

    let outcome = launch(&config, request).await?;
    println!(
        "\n✅ Session {} finished after {} rounds: {} documents",
        outcome.context.session_id,
        outcome.context.round,
        outcome.plan.documents.len()
    );
    for path in &outcome.written {
        println!("  {}", path.display());
    }
    Ok(())
}
