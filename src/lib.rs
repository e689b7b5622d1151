pub mod bulk;
pub mod capture;
pub mod config;
pub mod dom;
pub mod error;
pub mod identity;
pub mod locator;
pub mod notify;
pub mod platforms;
pub mod position;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod store;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use config::EngineConfig;
use dom::Document;
use dom::fixture::FixturePage;
use identity::{MessageId, ScopeKey, SessionToken};
use notify::TracingNotifier;
use session::TrackerSession;
use store::{ConversationStore, JsonFileStore};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "turntrack",
    version,
    about = "Replay recorded chat pages through the conversation turn tracker"
)]
pub struct Cli {
    /// Engine config file (TOML); defaults to the per-user config when it exists
    #[arg(long, global = true, env = "TURNTRACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Conversation store file (defaults to platform data dir)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach to a page fixture, run capture passes and print the stored conversation
    Replay {
        /// JSON page fixture
        fixture: PathBuf,
        /// Number of capture passes
        #[arg(long, default_value_t = 1)]
        passes: u32,
        /// Run the bulk loader after the passes
        #[arg(long)]
        load_all: bool,
        /// Reuse a tab session token instead of generating one
        #[arg(long)]
        token: Option<String>,
    },
    /// List stored scope keys, or print one conversation
    Show {
        key: Option<String>,
    },
    /// Run the locator for a message identity against a page fixture
    Locate {
        fixture: PathBuf,
        message_id: String,
        /// Text to fall back on when the identity no longer matches
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading engine config")?;
    let store_path = match cli.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    tracing::debug!(store = %store_path.display(), "using conversation store");
    let kv = JsonFileStore::new(store_path);

    match cli.command {
        Commands::Replay {
            fixture,
            passes,
            load_all,
            token,
        } => run_replay(&fixture, kv, config, passes, load_all, token).await,
        Commands::Show { key } => run_show(kv, key).await,
        Commands::Locate {
            fixture,
            message_id,
            content,
            token,
        } => run_locate(&fixture, kv, config, MessageId::new(message_id), content, token).await,
    }
}

type FixtureSession = TrackerSession<FixturePage, JsonFileStore, TracingNotifier>;

fn attach_fixture(
    fixture: &Path,
    kv: JsonFileStore,
    config: EngineConfig,
    token: Option<String>,
) -> Result<FixtureSession> {
    let page = FixturePage::load(fixture)
        .with_context(|| format!("reading fixture {}", fixture.display()))?;
    let href = page.href();
    let token = token.map(SessionToken::new).unwrap_or_else(SessionToken::generate);
    let session = TrackerSession::attach_with_token(page, kv, TracingNotifier, config, token)
        .ok_or_else(|| anyhow!("no platform profile matches {href}"))?;
    tracing::info!(
        tab_id = %session.token(),
        scope_key = %session.scope_key(),
        "attached to fixture"
    );
    Ok(session)
}

async fn run_replay(
    fixture: &Path,
    kv: JsonFileStore,
    config: EngineConfig,
    passes: u32,
    load_all: bool,
    token: Option<String>,
) -> Result<()> {
    let mut session = attach_fixture(fixture, kv, config, token)?;
    for pass in 0..passes {
        let outcome = session.capture().await;
        tracing::info!(pass, ?outcome, "capture pass");
    }
    if load_all {
        session.load_all_messages().await;
    }

    match session.stored_conversation().await {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("no completed turns captured"),
    }
    Ok(())
}

async fn run_show(kv: JsonFileStore, key: Option<String>) -> Result<()> {
    let store = ConversationStore::new(kv);
    match key {
        None => {
            for key in store.list().await? {
                println!("{key}");
            }
        }
        Some(key) => {
            let record = store
                .load(&ScopeKey::new(key.clone()))
                .await?
                .ok_or_else(|| anyhow!("no conversation stored under {key}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

async fn run_locate(
    fixture: &Path,
    kv: JsonFileStore,
    config: EngineConfig,
    message_id: MessageId,
    content: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let mut session = attach_fixture(fixture, kv, config, token)?;
    if session.highlight_message(&message_id, content.as_deref()).await {
        println!("found");
    } else {
        println!("not found");
    }
    Ok(())
}

fn default_store_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "chat-turn-tracker", "chat-turn-tracker")
        .context("no home directory to derive the default store path from")?;
    Ok(dirs.data_dir().join("conversations.json"))
}
