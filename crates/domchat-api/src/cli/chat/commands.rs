//! Slash commands available inside the chat loop.

use console::style;

#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    Help,
    Clear,
    Exit,
    /// Leave the current conversation; the next message starts a new one.
    New,
    /// Re-read the conversation from storage and reprint it.
    History,
    /// Print the active bundle's capabilities.
    Tools,
    Unknown(String),
}

/// Parse user input as a slash command. `None` for ordinary messages.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let cmd = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    Some(match cmd.as_str() {
        "/help" | "/h" | "/?" => ChatCommand::Help,
        "/clear" | "/cls" => ChatCommand::Clear,
        "/exit" | "/quit" | "/q" => ChatCommand::Exit,
        "/new" => ChatCommand::New,
        "/history" => ChatCommand::History,
        "/tools" => ChatCommand::Tools,
        _ => ChatCommand::Unknown(cmd),
    })
}

pub fn print_help() {
    let rows = [
        ("/help", "Show this help message"),
        ("/clear", "Clear the screen"),
        ("/exit", "End the chat"),
        ("/new", "Start a new conversation"),
        ("/history", "Reload and show this conversation"),
        ("/tools", "List the capabilities the assistant can use"),
    ];

    println!();
    println!("  {}", style("Available commands:").bold());
    println!();
    for (name, text) in rows {
        println!("  {:<10} {text}", style(name).cyan());
    }
    println!();
    println!("  {}", style("Ctrl+C stops a streaming answer, Ctrl+D exits").dim());
    println!();
}
