/// chatsync - headless chat client driving the sync engine from stdin
use chatsync_core::chat_types::UserIdentity;
use chatsync_core::cli_app::{self, CliCommand};
use chatsync_core::notify::LogNotifier;
use chatsync_core::search::HttpUserSearch;
use chatsync_core::sync::{EngineCommand, EngineSnapshot, SyncEngine};
use chatsync_core::transport::{ReconnectPolicy, SocketIoTransport};
use chatsync_core::Config;
use colored::*;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let identity = UserIdentity::new(&config.user_id, &config.display_name, &config.avatar);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let transport = SocketIoTransport::new(&config.server_url, ReconnectPolicy::from_config(&config), inbound_tx)
        .map_err(|e| anyhow::anyhow!("Transport error: {}", e))?;

    info!("💬 Starting chatsync");
    info!("   User: {}", identity.id);
    info!("   Server: {}", transport.endpoint());

    let engine = SyncEngine::new(identity.clone(), transport, &config)
        .with_search(Arc::new(HttpUserSearch::new(config.search_base())))
        .with_notifier(Box::new(LogNotifier));
    let mut events = engine.subscribe();

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let engine_task = tokio::spawn(engine.run(inbound_rx, commands_rx));

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => cli_app::print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("{} {} events skipped", "⚠".yellow(), n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    cli_app::print_usage();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match cli_app::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
                continue;
            }
        };

        let forward = match command {
            CliCommand::Quit => break,
            CliCommand::Help => {
                cli_app::print_usage();
                continue;
            }
            CliCommand::List => {
                cli_app::print_conversations(&snapshot(&commands_tx).await?);
                continue;
            }
            CliCommand::History => {
                cli_app::print_history(&snapshot(&commands_tx).await?, &identity.id);
                continue;
            }
            CliCommand::Status => {
                cli_app::print_status(&snapshot(&commands_tx).await?);
                continue;
            }
            CliCommand::New(peer_id) => {
                let current = snapshot(&commands_tx).await?;
                EngineCommand::StartNew(cli_app::resolve_new_peer(&current, &peer_id))
            }
            CliCommand::Open(peer_id) => EngineCommand::Open(peer_id),
            CliCommand::Send { peer_id, content } => EngineCommand::Send { peer_id, content },
            CliCommand::Search(query) => EngineCommand::Search(query),
            CliCommand::Refresh => EngineCommand::Refresh,
            CliCommand::Visible(visible) => EngineCommand::SetVisible(visible),
        };
        if commands_tx.send(forward).is_err() {
            break;
        }
    }

    let _ = commands_tx.send(EngineCommand::Shutdown);
    engine_task
        .await
        .map_err(|e| anyhow::anyhow!("Engine task failed: {}", e))?
        .map_err(|e| anyhow::anyhow!("Engine error: {}", e))?;
    info!("Bye");
    Ok(())
}

async fn snapshot(commands: &mpsc::UnboundedSender<EngineCommand>) -> anyhow::Result<EngineSnapshot> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(EngineCommand::Snapshot(tx))
        .map_err(|_| anyhow::anyhow!("Engine stopped"))?;
    Ok(rx.await?)
}
