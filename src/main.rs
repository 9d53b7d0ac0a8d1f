//! Messagable CLI entry point.
//!
//! Administrative access to a message database: apply the schema, list a
//! party's inbox or sent copies, inspect a message, mark it as read.
//! Sending needs the host application's registry and is not exposed here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use messagable::config::{config_dir, load_config, Config};
use messagable::messaging::store::{connect, MessageStore};
use messagable::messaging::{Message, PartyRef};

/// Messagable: inspect and maintain a message database.
#[derive(Parser)]
#[command(name = "messagable", version, about)]
struct Cli {
    /// Path to `config.toml` (default: `~/.messagable/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create the database and apply the schema.
    Migrate,
    /// List messages received by a party.
    Inbox {
        /// Record kind of the party.
        kind: String,
        /// Record id of the party.
        id: i64,
        /// Only unread messages.
        #[arg(long)]
        unread: bool,
        /// Maximum number of messages.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List sender copies of messages sent by a party.
    Sent {
        /// Record kind of the party.
        kind: String,
        /// Record id of the party.
        id: i64,
        /// Maximum number of messages.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one message with its metadata.
    Show {
        /// Message id.
        id: i64,
    },
    /// Mark a message as read.
    Read {
        /// Message id.
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let base = config_dir()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| base.join("config.toml"));
    let mut config = load_config(&config_path)?;
    config.apply_overrides(|key| std::env::var(key).ok());

    messagable::logging::init_cli(&config.logging.level)?;
    debug!(config = %config_path.display(), "configuration loaded");

    let store = open_store(&config, &base).await?;

    match cli.command {
        Command::Migrate => {
            println!("schema applied ({} messages)", store.count().await?);
        }
        Command::Inbox {
            kind,
            id,
            unread,
            limit,
        } => {
            let party = PartyRef::new(kind, id);
            let messages = if unread {
                store.unread_messages(&party, limit).await?
            } else {
                store.received_messages(&party, limit).await?
            };
            print_list(&messages);
        }
        Command::Sent { kind, id, limit } => {
            let messages = store.sent_messages(&PartyRef::new(kind, id), limit).await?;
            print_list(&messages);
        }
        Command::Show { id } => {
            let message = store.find(id).await?;
            print_message(&message)?;
        }
        Command::Read { id } => {
            let mut message = store.find(id).await?;
            store.mark_as_read(&mut message).await?;
            println!("message {id} marked as read");
        }
    }

    Ok(())
}

/// Open the configured database, creating its directory if needed.
async fn open_store(config: &Config, base: &std::path::Path) -> anyhow::Result<MessageStore> {
    let db_path = config.db_path(base);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let pool = connect(&db_path, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open message db at {}", db_path.display()))?;
    Ok(MessageStore::new(pool).with_limits(config.messages.clone()))
}

fn print_list(messages: &[Message]) {
    if messages.is_empty() {
        println!("no messages");
        return;
    }
    for message in messages {
        let state = if message.is_read() { "read" } else { "unread" };
        println!(
            "#{} [{state}] {} -> {}: {}",
            message.id, message.sender, message.recipient, message.subject
        );
    }
}

fn print_message(message: &Message) -> anyhow::Result<()> {
    println!("id:          {}", message.id);
    println!("from:        {}", message.sender);
    println!("to:          {}", message.recipient);
    println!("sender copy: {}", message.sender_copy);
    println!("created at:  {}", message.created_at.to_rfc3339());
    match message.read_at {
        Some(read_at) => println!("read at:     {}", read_at.to_rfc3339()),
        None => println!("read at:     -"),
    }
    if let Some(url) = message.url() {
        println!("url:         {url}");
    }
    println!("subject:     {}", message.subject);
    println!();
    println!("{}", message.content);
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(message.metadata()).context("failed to render metadata")?
    );
    Ok(())
}
