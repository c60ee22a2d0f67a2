//! Main chat loop.
//!
//! Resolves the conversation to resume (if any), prints the banner and the
//! stored history, then runs one turn per submitted line. Every frame is
//! applied to the [`Transcript`] before it is drawn.

use std::time::Instant;

use anyhow::Context;
use console::style;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use domchat_core::chat::reconcile::Transcript;
use domchat_core::chat::runtime::TurnRequest;
use domchat_types::frame::StreamFrame;

use crate::state::{AppState, ConcreteRuntime};

use super::banner::print_welcome_banner;
use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};
use super::renderer::ChatRenderer;

/// Run the interactive chat loop against the active session.
pub async fn run_chat_loop(
    state: &AppState,
    user: &str,
    resume: Option<Uuid>,
) -> anyhow::Result<()> {
    let runtime = state.runtime().await;
    let session = runtime.session();
    let bundle = session.bundle();
    let renderer = ChatRenderer::new(bundle);

    let mut transcript = Transcript::new();
    let mut conversation_id = None;
    if let Some(id) = resume {
        let detail = state
            .conversations
            .detail(user, &id)
            .await
            .with_context(|| format!("Conversation '{id}' not found for user '{user}'"))?;
        if detail.conversation.partition != session.partition() {
            anyhow::bail!(
                "Conversation '{id}' belongs to partition '{}', but the active bundle uses '{}'",
                detail.conversation.partition,
                session.partition()
            );
        }
        transcript.resync(&detail.messages);
        conversation_id = Some(id);
    }

    let id_text = conversation_id.map(|id: Uuid| id.to_string());
    print_welcome_banner(bundle, id_text.as_deref());
    if !transcript.is_empty() {
        renderer.print_transcript(&transcript);
    }

    let prompt = format!("  {} ", style("You >").green().bold());
    let (mut chat_input, _writer) =
        ChatInput::new(prompt).map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;

    loop {
        let text = match chat_input.read_line().await {
            InputEvent::Eof => break,
            InputEvent::Interrupted => {
                println!("\n  {}", style("Press Ctrl+D to exit, or keep chatting.").dim());
                continue;
            }
            InputEvent::Line(text) if text.is_empty() => continue,
            InputEvent::Line(text) => text,
        };

        if let Some(cmd) = commands::parse(&text) {
            match cmd {
                ChatCommand::Help => commands::print_help(),
                ChatCommand::Clear => chat_input.clear(),
                ChatCommand::Exit => break,
                ChatCommand::New => {
                    conversation_id = None;
                    transcript = Transcript::new();
                    println!("\n  {}\n", style("Started a new conversation.").dim());
                }
                ChatCommand::History => match conversation_id {
                    Some(id) => {
                        let detail = state.conversations.detail(user, &id).await?;
                        transcript.resync(&detail.messages);
                        println!();
                        renderer.print_transcript(&transcript);
                    }
                    None => println!("\n  {}\n", style("Nothing sent yet.").dim()),
                },
                ChatCommand::Tools => {
                    println!();
                    for capability in session.capabilities() {
                        println!(
                            "  {} {}",
                            style(capability.name()).cyan(),
                            style(capability.purpose()).dim()
                        );
                    }
                    println!();
                }
                ChatCommand::Unknown(name) => {
                    println!(
                        "\n  {} Unknown command: {}. Type /help for available commands.\n",
                        style("?").yellow().bold(),
                        style(name).dim()
                    );
                }
            }
            continue;
        }

        transcript.push_user(text.clone());
        let started = Instant::now();
        let request = TurnRequest {
            user_id: user.to_string(),
            conversation_id,
            message: text,
        };
        let done = run_turn(
            &runtime,
            &renderer,
            &mut transcript,
            &mut conversation_id,
            request,
        )
        .await;
        if done {
            renderer.print_footer(started.elapsed().as_millis() as u64, &bundle.agent.model);
        }
        println!();
    }

    chat_input.flush();
    println!("\n  {}", style("Chat ended.").dim());
    if let Some(id) = conversation_id {
        println!(
            "  {}",
            style(format!("Resume with: domchat chat --conversation {id}")).dim()
        );
    }
    Ok(())
}

/// Stream one turn to the terminal. Ctrl+C cancels it. Returns whether the
/// turn completed with `done`.
async fn run_turn(
    runtime: &ConcreteRuntime,
    renderer: &ChatRenderer,
    transcript: &mut Transcript,
    conversation_id: &mut Option<Uuid>,
    request: TurnRequest,
) -> bool {
    let turn = match runtime.begin(request).await {
        Ok(turn) => turn,
        Err(err) => {
            tracing::warn!(error = %err, "Turn rejected");
            let frame = StreamFrame::error(err.client_message());
            transcript.apply(&frame);
            renderer.print_failure(err.client_message());
            return false;
        }
    };
    *conversation_id = Some(turn.conversation().id);

    let cancel = CancellationToken::new();
    let mut frames = Box::pin(turn.into_frames(cancel.clone()));
    let mut started_answer = false;
    let mut interrupt = Box::pin(tokio::signal::ctrl_c());

    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = &mut interrupt, if !cancel.is_cancelled() => {
                cancel.cancel();
                continue;
            }
        };
        let Some(frame) = frame else {
            return false;
        };

        transcript.apply(&frame);
        match &frame {
            StreamFrame::Delta { content } => {
                if !started_answer {
                    renderer.print_assistant_label();
                    started_answer = true;
                }
                renderer.print_streaming_token(content);
            }
            StreamFrame::Done => {
                println!();
                return true;
            }
            StreamFrame::Error { message } => {
                let message = if cancel.is_cancelled() {
                    "Stopped."
                } else {
                    message.as_str()
                };
                renderer.print_failure(message);
                return false;
            }
        }
    }
}
