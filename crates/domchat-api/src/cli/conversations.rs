//! Conversation CLI commands: list, show.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use domchat_core::chat::reconcile::Transcript;
use domchat_types::chat::{ConversationFilter, MessageRole};

use crate::state::AppState;

const TITLE_WIDTH: usize = 40;

/// List a user's conversations, pinned first, most recently updated next.
///
/// # Examples
///
/// ```bash
/// domchat conversations list --user alice
/// domchat conversations list --partition horse_racing --json
/// ```
pub async fn list_conversations(
    state: &AppState,
    user: &str,
    filter: ConversationFilter,
    json: bool,
) -> Result<()> {
    let page = state.conversations.list(user, filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.items.is_empty() {
        println!();
        println!(
            "  {} No conversations for '{}'. Start one with: {}",
            style("i").blue().bold(),
            style(user).cyan(),
            style("domchat chat").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Partition").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for conversation in &page.items {
        let mut title = truncate(&conversation.title, TITLE_WIDTH);
        if conversation.is_pinned {
            title = format!("* {title}");
        }
        let title_cell = if conversation.is_archived {
            Cell::new(title).fg(Color::DarkGrey)
        } else {
            Cell::new(title).fg(Color::Cyan)
        };
        table.add_row(vec![
            Cell::new(conversation.id.to_string()).fg(Color::DarkGrey),
            title_cell,
            Cell::new(&conversation.partition),
            Cell::new(conversation.message_count.to_string()),
            Cell::new(conversation.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} of {} conversation{}{}",
        style(page.items.len()).bold(),
        style(page.total).bold(),
        if page.total == 1 { "" } else { "s" },
        if page.has_more { " (more with --limit)" } else { "" }
    );
    println!();
    Ok(())
}

/// Print one conversation as a transcript.
pub async fn show_conversation(state: &AppState, user: &str, id: Uuid, json: bool) -> Result<()> {
    let detail = state.conversations.detail(user, &id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!();
    println!("  {}", style(&detail.conversation.title).cyan().bold());
    println!(
        "  {}",
        style(format!(
            "{} · {} messages",
            detail.conversation.partition, detail.conversation.message_count
        ))
        .dim()
    );
    println!();
    for entry in Transcript::from_history(&detail.messages).entries() {
        let label = match entry.role {
            MessageRole::User => style("You").green().bold(),
            MessageRole::Assistant => style("Assistant").cyan().bold(),
        };
        println!("  {label}");
        for line in entry.content.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let head: String = text.chars().take(width - 3).collect();
    format!("{head}...")
}
