//! Welcome banner printed when a chat starts.

use console::style;

use domchat_types::bundle::ConfigBundle;

/// Show the bundle identity, model and conversation, plus a few sample
/// queries when the bundle defines them.
pub fn print_welcome_banner(bundle: &ConfigBundle, conversation: Option<&str>) {
    println!();
    println!("  {}", style(&bundle.display.name).cyan().bold());
    if !bundle.display.description.is_empty() {
        println!("  {}", style(&bundle.display.description).dim());
    }
    println!();
    println!("  {}  {}", style("Model:").bold(), style(&bundle.agent.model).dim());
    println!("  {}  {}", style("Agent:").bold(), style(&bundle.agent.name).dim());
    let conversation = conversation.unwrap_or("new");
    println!(
        "  {}  {}",
        style("Chat:").bold(),
        style(&conversation[..8.min(conversation.len())]).dim()
    );

    if !bundle.ui.sample_queries.is_empty() {
        println!();
        println!("  {}", style("Try asking:").bold());
        for query in bundle.ui.sample_queries.iter().take(3) {
            println!("    {} {}", style("›").cyan(), style(query).dim());
        }
    }

    println!();
    println!("  {}", style("Type /help for commands, Ctrl+D to exit").dim());
    println!("  {}", style("---").dim());
    println!();
}
