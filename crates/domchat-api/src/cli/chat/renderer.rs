//! Terminal rendering of transcript entries.
//!
//! While a turn streams, deltas are printed raw. Entries loaded from
//! storage (resume, `/history`) are rendered as markdown through `termimad`.

use std::io::Write;

use console::style;
use termimad::MadSkin;
use termimad::crossterm::style::Color;

use domchat_core::chat::reconcile::{EntryStatus, Transcript, TranscriptEntry};
use domchat_types::bundle::ConfigBundle;
use domchat_types::chat::MessageRole;

pub struct ChatRenderer {
    skin: MadSkin,
    assistant: String,
}

impl ChatRenderer {
    pub fn new(bundle: &ConfigBundle) -> Self {
        let mut skin = MadSkin::default_dark();
        skin.bold.set_fg(Color::Cyan);
        skin.headers[0].set_fg(Color::Cyan);
        skin.headers[1].set_fg(Color::Cyan);
        skin.inline_code.set_fg(Color::Yellow);
        Self {
            skin,
            assistant: bundle.agent.name.clone(),
        }
    }

    pub fn render_markdown(&self, markdown: &str) -> String {
        self.skin.term_text(markdown).to_string()
    }

    pub fn print_assistant_label(&self) {
        print!("\n  {} ", style(&self.assistant).cyan().bold());
        let _ = std::io::stdout().flush();
    }

    pub fn print_streaming_token(&self, token: &str) {
        print!("{token}");
        let _ = std::io::stdout().flush();
    }

    pub fn print_entry(&self, entry: &TranscriptEntry) {
        match (entry.role, entry.status) {
            (_, EntryStatus::Failed) => self.print_failure(&entry.content),
            (MessageRole::User, _) => {
                println!("  {} {}", style("You >").green().bold(), entry.content);
            }
            (MessageRole::Assistant, _) => {
                println!("  {}", style(&self.assistant).cyan().bold());
                for line in self.render_markdown(&entry.content).lines() {
                    println!("  {line}");
                }
            }
        }
        println!();
    }

    pub fn print_transcript(&self, transcript: &Transcript) {
        if transcript.is_empty() {
            println!("  {}", style("(no messages yet)").dim());
            println!();
            return;
        }
        for entry in transcript.entries() {
            self.print_entry(entry);
        }
    }

    pub fn print_failure(&self, message: &str) {
        println!("\n  {} {}", style("!").red().bold(), style(message).red());
    }

    /// Footer under a completed answer: elapsed time and model.
    pub fn print_footer(&self, response_ms: u64, model: &str) {
        let seconds = response_ms as f64 / 1000.0;
        println!(
            "\n  {} {:.1}s {} {}",
            style("|").dim(),
            style(seconds).dim(),
            style("\u{00b7}").dim(),
            style(model).dim(),
        );
    }
}
