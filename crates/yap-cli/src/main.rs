//! Yap CLI
//!
//! Command-line presentation of the Yap discussion board.
//!
//! # Usage
//!
//! ```bash
//! # List topics, most favorited first
//! yap topics
//!
//! # Only topics posted since the last listing
//! yap topics --search unread
//!
//! # Start a topic and comment on it
//! yap new --title "Cats" --body "Tell me about cats" --keywords "cute, pets"
//! yap comment <topic> "Mine sleeps all day" --quote "about cats"
//!
//! # Write while offline, deliver later
//! yap --offline comment <topic> "written on the train"
//! yap flush
//!
//! # Follow a thread live
//! yap watch <topic>
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use yap_board::{Board, CommentThread, Submission};
use yap_core::{CommentId, Topic, TopicId};
use yap_storage::{DocumentStore, FileKv, KeyValueStore, SqliteStore};

use crate::config::Config;

/// Yap - a small discussion board
#[derive(Parser, Debug)]
#[command(name = "yap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "YAP_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database holding the board
    #[arg(long, env = "YAP_DB")]
    db: Option<PathBuf>,

    /// File holding this device's identity, marks and queued comments
    #[arg(long, env = "YAP_LOCAL")]
    local: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "YAP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Display name used the first time this device posts
    #[arg(long, env = "YAP_USER")]
    user: Option<String>,

    /// Treat the board as unreachable; comments are queued
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List topics
    Topics {
        /// Filter by text, or `unread`
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Start a new topic
    New {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        /// Comma-separated keywords
        #[arg(long, default_value = "")]
        keywords: String,
    },
    /// Open a topic and print its thread
    Show { topic: String },
    /// Toggle a topic as favorite
    Favorite { topic: String },
    /// Comment on a topic
    Comment {
        topic: String,
        text: String,
        /// Excerpt of the topic body being answered
        #[arg(long)]
        quote: Option<String>,
    },
    /// Reply to a comment
    Reply {
        topic: String,
        comment: String,
        text: String,
    },
    /// Deliver comments queued while offline
    Flush,
    /// Print a topic's thread on every change until interrupted
    Watch { topic: String },
    /// Show or change this device's identity
    Whoami {
        /// New display name
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let level = args
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "warn".to_string());
    init_logging(&level);

    let data_dir = crate::config::data_dir();
    let db_path = args
        .db
        .clone()
        .or_else(|| config.store.db.clone())
        .unwrap_or_else(|| data_dir.join("board.db"));
    let local_path = args
        .local
        .clone()
        .or_else(|| config.store.local.clone())
        .unwrap_or_else(|| data_dir.join("local.json"));

    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    info!(db = %db_path.display(), local = %local_path.display(), "Opening board");
    let store: Arc<dyn DocumentStore> = Arc::new(
        SqliteStore::new(&db_path)
            .with_context(|| format!("Failed to open board database {}", db_path.display()))?,
    );
    let kv: Arc<dyn KeyValueStore> = Arc::new(
        FileKv::open(&local_path)
            .with_context(|| format!("Failed to open local state {}", local_path.display()))?,
    );

    let mut board = Board::open(store, kv, config.board, args.user.as_deref())?;
    if args.offline {
        board.connectivity().set_online(false);
    }

    if !matches!(args.command, Command::Flush) {
        deliver_queued(&board).await;
    }

    run(&mut board, args.command).await
}

/// Opportunistic flush at start; failures leave the queue for later
async fn deliver_queued(board: &Board) {
    match board.flush_if_online().await {
        Ok(Some(report)) if !report.delivered.is_empty() => {
            println!(
                "{}",
                format!("Delivered {} queued comment(s)", report.delivered.len()).dimmed()
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not deliver queued comments"),
    }
}

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn run(board: &mut Board, command: Command) -> Result<()> {
    match command {
        Command::Topics { search } => {
            let topics = match search {
                Some(query) => board.search(&query).await?,
                None => board.list_topics().await?,
            };
            if topics.is_empty() {
                println!("{}", "No topics yet.".dimmed());
            }
            for topic in &topics {
                print_topic_line(board, topic);
            }
        }

        Command::New { title, body, keywords } => {
            let topic = board.create_topic(&title, &body, &keywords).await?;
            println!("{} {}", "Created".green(), topic.id.to_string().bold());
        }

        Command::Show { topic } => {
            let id = parse_topic(&topic)?;
            let view = board.open_topic(&id).await?;
            print_topic(&view.topic, view.favorited);
            print_thread(&view.thread);
        }

        Command::Favorite { topic } => {
            let id = parse_topic(&topic)?;
            if board.toggle_favorite(&id).await? {
                println!("{} {}", "★".yellow(), "Added to favorites".green());
            } else {
                println!("{} {}", "☆".dimmed(), "Removed from favorites");
            }
        }

        Command::Comment { topic, text, quote } => {
            let id = parse_topic(&topic)?;
            match board.submit_comment(&id, &text, quote.as_deref()).await? {
                Submission::Sent(comment) => {
                    println!("{} {}", "Posted".green(), comment.id.to_string().bold());
                }
                Submission::Queued(queued) => {
                    println!(
                        "{} comment #{} ({} waiting, run `yap flush` once online)",
                        "Queued".yellow(),
                        queued.seq,
                        board.queue().len()
                    );
                }
            }
        }

        Command::Reply { topic, comment, text } => {
            let id = parse_topic(&topic)?;
            let comment = CommentId::new(comment).context("Invalid comment id")?;
            board.submit_reply(&id, &comment, &text).await?;
            println!("{}", "Replied".green());
        }

        Command::Flush => {
            if board.queue().is_empty() {
                println!("{}", "Nothing queued.".dimmed());
                return Ok(());
            }
            let report = board.flush_queue().await?;
            println!(
                "{} delivered, {} failed, {} remaining",
                report.delivered.len().to_string().green(),
                report.failed.to_string().red(),
                report.remaining
            );
        }

        Command::Watch { topic } => {
            let id = parse_topic(&topic)?;
            let view = board.open_topic(&id).await?;
            print_topic(&view.topic, view.favorited);

            let flusher = board.spawn_auto_flush();
            let mut thread = board.watch_comments(&id)?;
            println!("{}", "Watching for comments, Ctrl-C to stop.".dimmed());

            loop {
                tokio::select! {
                    update = thread.next() => match update {
                        Some(update) => {
                            debug!(comments = update.len(), "Thread updated");
                            println!("{}", "─".repeat(40).dimmed());
                            print_thread(&update);
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            thread.cancel();
            board.close_topic();
            flusher.abort();
        }

        Command::Whoami { name } => {
            if let Some(name) = name {
                board.rename(&name)?;
            }
            let identity = board.identity();
            println!("{} {}", "Name:  ".dimmed(), identity.display_name().bold());
            println!("{} {}", "Device:".dimmed(), identity.device_id());
            if !board.queue().is_empty() {
                println!("{} {}", "Queued:".dimmed(), board.queue().len());
            }
        }
    }

    Ok(())
}

fn parse_topic(raw: &str) -> Result<TopicId> {
    TopicId::new(raw).context("Invalid topic id")
}

fn print_topic_line(board: &Board, topic: &Topic) {
    let marker = if board.marks().is_unread(&topic.id) {
        "●".cyan()
    } else {
        " ".normal()
    };
    let star = if board.marks().is_favorite(&topic.id) {
        "★".yellow()
    } else {
        "☆".dimmed()
    };

    println!(
        "{} {} {}  {}  {}",
        marker,
        star,
        topic.id.to_string().dimmed(),
        topic.title.bold(),
        format!("★{} 👁{}", topic.favorites_count, topic.view_count).dimmed()
    );
}

fn print_topic(topic: &Topic, favorited: bool) {
    let star = if favorited { "★".yellow() } else { "☆".dimmed() };
    println!("{} {}", star, topic.title.bold());
    println!("{}", topic.body);
    if !topic.keywords.is_empty() {
        println!("{}", topic.keywords.join(", ").cyan());
    }
    println!(
        "{}",
        format!("{} favorites, {} views", topic.favorites_count, topic.view_count).dimmed()
    );
    println!();
}

fn print_thread(thread: &[CommentThread]) {
    if thread.is_empty() {
        println!("{}", "No comments yet.".dimmed());
    }
    for entry in thread {
        let comment = &entry.comment;
        if let Some(reference) = &comment.reference {
            println!("  {} {}", "│".dimmed(), reference.italic().dimmed());
        }
        println!(
            "  {} {}  {}",
            comment.user_name.green(),
            comment.id.to_string().dimmed(),
            comment.text
        );
        for reply in &entry.replies {
            println!("      {} {}", reply.user_name.blue(), reply.text);
        }
    }
}
