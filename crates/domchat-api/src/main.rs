//! domchat CLI and server entry point.
//!
//! Binary name: `domchat`
//!
//! Parses CLI arguments, sets up tracing, then either runs a configuration
//! command, opens the application state for chat / conversation commands,
//! or starts the HTTP + WebSocket server.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{BundleCommand, Cli, Commands, ConversationsCommand};
use domchat_types::chat::ConversationFilter;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Used only when RUST_LOG is unset. Interactive commands stay quiet.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if matches!(cli.command, Commands::Serve { .. }) => {
            domchat_observe::tracing_setup::DEFAULT_FILTER
        }
        0 => "warn",
        1 => "domchat=debug,tower_http=debug",
        _ => "trace",
    };
    let otel = domchat_observe::otel_requested(cli.verbose > 0);
    if let Err(e) = domchat_observe::init_tracing(filter, otel) {
        eprintln!("failed to initialise tracing: {e}");
    }

    let result = run(cli).await;
    domchat_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let domain = cli.domain.clone();

    match cli.command {
        Commands::Bundle { action } => match action {
            BundleCommand::Show => {
                cli::bundle::show_bundle(&cli.config_dir, domain.as_deref(), cli.json).await?;
            }
            BundleCommand::List => {
                cli::bundle::list_bundles(&cli.config_dir, domain.as_deref(), cli.json).await?;
            }
            BundleCommand::Scaffold {
                id,
                name,
                description,
            } => {
                cli::bundle::scaffold(
                    &cli.config_dir,
                    &id,
                    &name,
                    description.as_deref(),
                    cli.json,
                )
                .await?;
            }
        },

        Commands::Conversations { action } => {
            let state = AppState::init(&cli.config_dir, domain).await?;
            match action {
                ConversationsCommand::List {
                    user,
                    partition,
                    limit,
                    archived,
                } => {
                    let filter = ConversationFilter {
                        partition,
                        limit,
                        offset: 0,
                        include_archived: archived,
                    };
                    cli::conversations::list_conversations(&state, &user, filter, cli.json)
                        .await?;
                }
                ConversationsCommand::Show { id, user } => {
                    cli::conversations::show_conversation(&state, &user, id, cli.json).await?;
                }
            }
        }

        Commands::Chat { conversation, user } => {
            let state = AppState::init(&cli.config_dir, domain).await?;
            cli::chat::loop_runner::run_chat_loop(&state, &user, conversation).await?;
        }

        Commands::Serve { port, host } => {
            let state = AppState::init(&cli.config_dir, domain).await?;
            let active = state.session().await;

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} domchat serving '{}' on {}",
                    console::style("⚡").bold(),
                    console::style(&active.bundle().display.name).cyan(),
                    console::style(format!("http://{addr}")).cyan()
                );
                for warning in &active.warnings {
                    println!("  {} {}", console::style("!").yellow().bold(), warning);
                }
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
