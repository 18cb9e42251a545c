use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use guardian_agent::{Dispatcher, OpenAiProvider, PromptBuilder, TurnOrchestrator, TurnSettings};
use guardian_core::config::GuardianConfig;
use guardian_gateway::auth::StaticTokenResolver;
use guardian_gateway::{app, AppState};
use guardian_records::SqliteRecordStore;
use guardian_sessions::SqliteConversationStore;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "guardian-gateway", version, about = "Streaming chat gateway for parents")]
struct Args {
    /// Config file (defaults to $GUARDIAN_CONFIG, then ~/.guardian/guardian.toml).
    #[arg(long, short)]
    config: Option<String>,

    /// Insert a small demo data set (parent `parent-demo`) before serving.
    #[arg(long)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guardian_gateway=info,guardian_agent=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    // load config: --config > GUARDIAN_CONFIG env > ~/.guardian/guardian.toml
    let config_path = args.config.or_else(|| std::env::var("GUARDIAN_CONFIG").ok());
    let config = GuardianConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        GuardianConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database: one file for records and conversations
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    guardian_records::db::init_db(&db)?;
    guardian_sessions::db::init_db(&db)?;
    if args.seed_demo {
        guardian_records::db::seed_demo(&db)?;
        info!("demo records seeded for parent-demo");
    }
    let students = guardian_records::store::student_count(&db)?;
    info!(students, "database migrations complete");

    // each subsystem gets its own connection
    let records = SqliteRecordStore::new(open_connection(&db_path)?);
    let conversations = SqliteConversationStore::new(open_connection(&db_path)?);

    let api_key = resolve_api_key(&config);
    if api_key.is_empty() {
        warn!("no provider API key configured; model calls will fail");
    }
    let provider = OpenAiProvider::new(
        api_key,
        config.provider.base_url.clone(),
        config.provider.chat_path.clone(),
    );
    let prompt = PromptBuilder::load(config.agent.system_prompt_path.as_deref().map(Path::new));
    let orchestrator = TurnOrchestrator::new(
        Arc::new(provider),
        Dispatcher::new(Arc::new(records)),
        prompt,
        TurnSettings::from_config(&config.agent),
    );

    let resolver = StaticTokenResolver::from_config(&config.auth);
    if resolver.is_empty() {
        warn!("no [auth] tokens configured; every chat request will be rejected");
    } else {
        info!(tokens = resolver.len(), "static token resolver ready");
    }

    info!(model = %config.agent.model, provider = %config.provider.base_url, "model provider ready");

    let state = Arc::new(AppState::new(
        config,
        orchestrator,
        Arc::new(resolver),
        Arc::new(conversations),
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Guardian gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn open_connection(path: &str) -> rusqlite::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Config key first, then the conventional env vars.
fn resolve_api_key(config: &GuardianConfig) -> String {
    if !config.provider.api_key.is_empty() {
        return config.provider.api_key.clone();
    }
    ["GEMINI_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
