#![deny(clippy::all)]

//! CLI for driving the mailbox synchronization engine

use clap::{Parser, Subcommand};
use mailsync::storage::{Dimension, MessageStore};
use mailsync::{
    Account, ConnectionManager, ImapConfig, MemoryStore, ProgressTracker, SyncEngine,
    SyncOptions, SyncStrategy, classifier,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailsync")]
#[command(about = "Multi-folder IMAP mailbox synchronization")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Test the IMAP connection and exit
    Test,

    /// Discover folders and show classification advice
    Folders,

    /// Run a full multi-folder sync into an in-memory store
    Sync {
        /// Explicit folders to sync (repeatable); omit for the
        /// recommended set
        #[arg(long)]
        folder: Vec<String>,

        /// Sync every discovered folder
        #[arg(long, conflicts_with = "folder")]
        all: bool,

        /// Include detected spam folders in the recommended set
        #[arg(long)]
        include_spam: bool,

        /// Most recent messages to fetch per folder (omit for all)
        #[arg(long)]
        limit: Option<u32>,

        /// Sync folders in parallel
        #[arg(long)]
        parallel: bool,

        /// Folder-sync workers in parallel mode (1-10)
        #[arg(long, default_value = "3")]
        max_concurrency: usize,

        /// Stop at the first folder failure
        #[arg(long)]
        fail_fast: bool,

        /// Skip message bodies, sync envelope data only
        #[arg(long)]
        headers_only: bool,

        /// Delete previously stored messages first (full re-import)
        #[arg(long)]
        clear_existing: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ImapConfig::from_env()?;
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(
        Arc::new(ConnectionManager::new()),
        Arc::new(ProgressTracker::new()),
        store.clone(),
    );

    match &args.command {
        Command::Test => cmd_test(&engine, &config, &args).await,
        Command::Folders => cmd_folders(&engine, config, &args).await,
        Command::Sync {
            folder,
            all,
            include_spam,
            limit,
            parallel,
            max_concurrency,
            fail_fast,
            headers_only,
            clear_existing,
        } => {
            let options = SyncOptions {
                folders: if *all {
                    Some(vec![])
                } else if folder.is_empty() {
                    None
                } else {
                    Some(folder.clone())
                },
                include_spam: *include_spam,
                limit: *limit,
                strategy: if *parallel {
                    SyncStrategy::Parallel
                } else {
                    SyncStrategy::Sequential
                },
                continue_on_error: !fail_fast,
                max_concurrency: *max_concurrency,
                fetch_body: !headers_only,
            };
            cmd_sync(&engine, &store, config, options, *clear_existing, &args).await
        }
    }
}

async fn cmd_test(
    engine: &SyncEngine,
    config: &ImapConfig,
    args: &Args,
) -> anyhow::Result<()> {
    let check = engine.test_connection(config).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        println!("{}", check.message);
    }

    if check.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn cmd_folders(
    engine: &SyncEngine,
    config: ImapConfig,
    args: &Args,
) -> anyhow::Result<()> {
    let account_id = config.username.clone();
    let account = Account::new(account_id, config);
    let folders = engine.discover_folders(&account).await?;
    let advice = classifier::folder_recommendations(&folders);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&advice)?);
        return Ok(());
    }

    println!(
        "{:<30} {:<10} {:<6} {:<6} {}",
        "Folder", "Category", "Conf", "Sync", "Reason"
    );
    println!("{}", "-".repeat(90));
    for a in &advice {
        println!(
            "{:<30} {:<10} {:<6.2} {:<6} {}",
            a.folder,
            format!("{:?}", a.category).to_lowercase(),
            a.confidence,
            if a.should_sync { "yes" } else { "no" },
            a.reason,
        );
    }
    println!("\n{} folder(s)", advice.len());
    Ok(())
}

async fn cmd_sync(
    engine: &SyncEngine,
    store: &MemoryStore,
    config: ImapConfig,
    options: SyncOptions,
    clear_existing: bool,
    args: &Args,
) -> anyhow::Result<()> {
    let account_id = config.username.clone();
    let account = Account::new(account_id.clone(), config);

    if clear_existing {
        let removed = engine.clear_account(&account.id)?;
        eprintln!("cleared {removed} previously stored messages");
    }

    let started = engine.start_sync(account, options);

    if started.already_running {
        println!("sync already in progress: session {}", started.session_id);
        return Ok(());
    }

    // Poll the session until it reaches a terminal state.
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        let Some(session) = engine.progress(&started.session_id) else {
            anyhow::bail!("session {} disappeared", started.session_id);
        };

        if !args.json {
            eprint!(
                "\r{:<12} folders {}/{}  messages {}/{}   ",
                format!("{:?}", session.status).to_lowercase(),
                session.folders_done,
                session.folders_planned,
                session.messages_done,
                session.messages_planned,
            );
        }

        if session.status.is_terminal() {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                eprintln!();
                println!("{}", session.message);
                for err in &session.errors {
                    println!("  error: {err}");
                }
            }
            break;
        }
    }

    // Stored totals per folder, straight from the store.
    let rows = store.count_grouped_by(&account_id, &[Dimension::FolderLabel])?;
    if !args.json && !rows.is_empty() {
        println!("\nstored messages by folder:");
        for row in rows {
            println!("  {:<30} {}", row.keys.join("/"), row.count);
        }
    }

    Ok(())
}
