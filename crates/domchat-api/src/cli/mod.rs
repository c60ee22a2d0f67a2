//! CLI command definitions for the `domchat` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a
//! noun-verb pattern (e.g., `domchat bundle show`, `domchat conversations list`).

pub mod bundle;
pub mod chat;
pub mod conversations;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Domain-scoped chat sessions from layered configuration bundles.
#[derive(Parser)]
#[command(name = "domchat", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug logs, -vv for trace). Also enables the
    /// OpenTelemetry stdout exporter.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding app.config.yaml, agents.config.yaml and domains/.
    #[arg(
        long,
        global = true,
        env = "DOMCHAT_CONFIG_DIR",
        default_value = "./config"
    )]
    pub config_dir: PathBuf,

    /// Bundle id to activate instead of `app.active_domain`.
    #[arg(long, global = true, env = "DOMCHAT_DOMAIN")]
    pub domain: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP + WebSocket server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Chat with the active bundle in the terminal.
    Chat {
        /// Resume an existing conversation.
        #[arg(long)]
        conversation: Option<Uuid>,

        /// User the conversation belongs to.
        #[arg(long, default_value = "anonymous")]
        user: String,
    },

    /// Inspect or create configuration bundles.
    Bundle {
        #[command(subcommand)]
        action: BundleCommand,
    },

    /// Browse stored conversations.
    #[command(alias = "conv")]
    Conversations {
        #[command(subcommand)]
        action: ConversationsCommand,
    },
}

#[derive(Subcommand)]
pub enum BundleCommand {
    /// Print the resolved active bundle (or `--domain`).
    Show,

    /// List available bundle ids.
    #[command(alias = "ls")]
    List,

    /// Create domains/<id>/domain.yaml and prompts.yaml skeletons.
    Scaffold {
        /// Bundle id (letters, digits, '-' and '_').
        id: String,

        /// Display name.
        #[arg(long)]
        name: String,

        /// One-line description.
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConversationsCommand {
    /// List a user's conversations, pinned first.
    #[command(alias = "ls")]
    List {
        #[arg(long, default_value = "anonymous")]
        user: String,

        /// Only conversations in this partition.
        #[arg(long)]
        partition: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,

        #[arg(long)]
        archived: bool,
    },

    /// Print a conversation's transcript.
    Show {
        id: Uuid,

        #[arg(long, default_value = "anonymous")]
        user: String,
    },
}
