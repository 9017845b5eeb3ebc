//! Rollcall Push CLI - web push delivery for attendance alerts.
//!
//! This is the main binary entry point. See the `rollcall_push` library
//! for the core functionality.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use rollcall_push::notifications::vapid;
use rollcall_push::server::{self, AppState};
use rollcall_push::{
    Config, Dispatcher, JsonFileStore, NotifyRequest, NotifyResponse, SubscriberFilter,
    SubscriberStore, VapidKeys,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "rollcall-push")]
#[command(version)]
#[command(about = "Encrypted web push delivery for Rollcall attendance alerts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP invocation endpoint
    Serve {
        /// Address to bind, overriding config
        #[arg(long)]
        listen: Option<String>,
    },
    /// Send one notification request and print the JSON response
    Send {
        /// Request JSON file (`-` for stdin)
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Manage the VAPID keypair
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Inspect stored push subscriptions
    Subscriptions {
        #[command(subcommand)]
        action: SubscriptionsAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Generate a new keypair and write it to vapid.json
    Generate {
        /// Overwrite an existing keypair (invalidates every subscription)
        #[arg(long)]
        force: bool,
    },
    /// Print the public key browsers subscribe with
    Show,
}

#[derive(Subcommand)]
enum SubscriptionsAction {
    /// List subscriptions, optionally for specific users
    List {
        /// Only this user (repeatable)
        #[arg(long)]
        user: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve { listen } => serve(config, listen).await,
        Commands::Send { file } => send(&config, &file).await,
        Commands::Keys { action } => match action {
            KeysAction::Generate { force } => generate_keys(&config, force),
            KeysAction::Show => show_keys(&config),
        },
        Commands::Subscriptions { action } => match action {
            SubscriptionsAction::List { user } => list_subscriptions(&config, user).await,
        },
    }
}

async fn open_store(config: &Config) -> Result<Arc<JsonFileStore>> {
    let path = config.store_path()?;
    Ok(Arc::new(JsonFileStore::open(path).await?))
}

fn build_dispatcher(config: &Config, store: Arc<dyn SubscriberStore>) -> Result<Dispatcher> {
    let keys = config.vapid_keys()?;
    log::info!("[WebPush] Using VAPID public key {}", keys.public_key_base64url());
    Dispatcher::new(store, keys, config.dispatch_settings())
}

async fn serve(config: Config, listen: Option<String>) -> Result<()> {
    let store: Arc<dyn SubscriberStore> = open_store(&config).await?;
    let dispatcher = Arc::new(build_dispatcher(&config, Arc::clone(&store))?);

    let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    server::serve(listener, AppState::new(dispatcher, store)).await
}

fn read_request(file: &Path) -> Result<Vec<u8>> {
    if file == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("Failed to read request from stdin")?;
        Ok(body)
    } else {
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))
    }
}

async fn send(config: &Config, file: &Path) -> Result<()> {
    let body = read_request(file)?;
    let (filter, payload) = match NotifyRequest::parse(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&NotifyResponse::failure(e.to_string()))?
            );
            anyhow::bail!("Invalid notification request");
        }
    };

    let store: Arc<dyn SubscriberStore> = open_store(config).await?;
    let dispatcher = build_dispatcher(config, store)?;
    let report = dispatcher.send(&filter, &payload).await?;

    let response = NotifyResponse::from(report);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn generate_keys(config: &Config, force: bool) -> Result<()> {
    let path = config.vapid_keys_path()?;
    if path.exists() && !force {
        anyhow::bail!(
            "VAPID keys already exist at {}; pass --force to replace them (existing subscriptions will stop working)",
            path.display()
        );
    }

    let keys = VapidKeys::generate();
    keys.save(&path)?;
    println!("Wrote VAPID keys to {}", path.display());
    println!("Public key: {}", keys.public_key_base64url());
    Ok(())
}

fn show_keys(config: &Config) -> Result<()> {
    let keys = config.vapid_keys()?;

    // Sign and verify a throwaway token so a broken keypair shows up here
    // rather than as 403s from every relay.
    let token = vapid::sign("https://localhost", &config.vapid_subject, &keys)?;
    vapid::verify(&token, &keys.public_key_bytes()?).context("VAPID self-check failed")?;

    println!("Public key: {}", keys.public_key_base64url());
    println!("Subject:    {}", config.vapid_subject);
    Ok(())
}

async fn list_subscriptions(config: &Config, users: Vec<String>) -> Result<()> {
    let store = open_store(config).await?;
    let filter = SubscriberFilter::from_user_ids(Some(users));
    let subscriptions = store.list(&filter).await?;

    if subscriptions.is_empty() {
        println!("No push subscriptions.");
        return Ok(());
    }

    for subscription in &subscriptions {
        let relay = vapid::audience_for_endpoint(&subscription.endpoint)
            .unwrap_or_else(|_| "<invalid endpoint>".to_string());
        let registered = subscription
            .created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<24} {:<32} {}", subscription.user_id, relay, registered);
    }
    println!("{} subscription(s)", subscriptions.len());
    Ok(())
}
