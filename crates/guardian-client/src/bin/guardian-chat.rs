use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use guardian_client::{ChatSession, GatewayClient, HttpConversationStore, TurnStatus, APOLOGY_TEXT};
use guardian_core::config::GuardianConfig;
use guardian_core::types::{ActorId, ConversationId};
use guardian_protocol::Frame;
use guardian_sessions::{ConversationStore, PersistenceCoordinator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "guardian-chat", version, about = "Terminal chat against a Guardian gateway")]
struct Args {
    /// Config file (defaults to $GUARDIAN_CONFIG, then ~/.guardian/guardian.toml).
    #[arg(long, short)]
    config: Option<String>,

    /// Gateway base URL; overrides `[client] base_url`.
    #[arg(long)]
    url: Option<String>,

    /// Bearer token; overrides `[client] token` (env: GUARDIAN_CLIENT__TOKEN).
    #[arg(long)]
    token: Option<String>,

    /// Continue an existing conversation.
    #[arg(long)]
    resume: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guardian_client=warn,guardian_sessions=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("GUARDIAN_CONFIG").ok());
    let config = GuardianConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        GuardianConfig::default()
    });

    let base_url = args.url.unwrap_or(config.client.base_url.clone());
    let token = args
        .token
        .or(config.client.token.clone())
        .context("no token: pass --token or set [client] token")?;

    let client = GatewayClient::new(base_url, token)
        .with_idle_timeout(Duration::from_secs(config.client.idle_timeout_secs));
    let store: Arc<dyn ConversationStore> = Arc::new(HttpConversationStore::new(client.clone()));
    // The gateway derives the real actor from the token.
    let actor = ActorId::from("me");

    let mut session = match args.resume {
        Some(id) => {
            let persistence =
                PersistenceCoordinator::resume(Arc::clone(&store), actor, ConversationId(id))
                    .await
                    .context("cannot resume conversation")?;
            let messages = persistence.get_messages().await?;
            let mut session = ChatSession::new(client.clone(), persistence);
            session.load_history(&messages);
            println!("Resumed with {} earlier messages.", messages.len());
            session
        }
        None => ChatSession::new(client.clone(), PersistenceCoordinator::new(Arc::clone(&store), actor)),
    };

    println!("Connected to {}. /list shows conversations, /quit exits.", client.base_url());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/list" => {
                list_conversations(store.as_ref(), session.persistence().actor()).await;
                continue;
            }
            _ => {}
        }

        let turn = session
            .send(line, |frame, _| match frame {
                Frame::Text(delta) => {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
                Frame::FunctionResults(results) => {
                    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
                    eprintln!("[looked up: {}]", names.join(", "));
                }
                _ => {}
            })
            .await;

        let turn = match turn {
            Ok(turn) => turn,
            Err(e) => {
                eprintln!("! {e}");
                continue;
            }
        };
        let result = &turn.result;
        match result.status {
            TurnStatus::Completed => {
                println!();
                println!(
                    "  [strength {:.2} | {} tool call(s)]",
                    result.prompt_strength.unwrap_or_default(),
                    result.function_calls
                );
            }
            TurnStatus::Failed | TurnStatus::Abandoned => {
                // Streamed text is already on screen; the fallback is not.
                match &result.message {
                    Some(message) if message.content == APOLOGY_TEXT => println!("{APOLOGY_TEXT}"),
                    _ => println!(),
                }
                if let Some(notice) = &result.notice {
                    eprintln!("! {notice}");
                }
            }
        }
    }

    if let Some(id) = session.persistence().conversation_id() {
        println!("Conversation {id}");
    }
    Ok(())
}

async fn list_conversations(store: &dyn ConversationStore, actor: &ActorId) {
    match store.list_conversations(actor, 20).await {
        Ok(list) if list.is_empty() => println!("No conversations yet."),
        Ok(list) => {
            for conv in list {
                println!(
                    "  {}  {}  {}",
                    conv.id,
                    conv.updated_at,
                    conv.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        Err(e) => eprintln!("! {e}"),
    }
}
