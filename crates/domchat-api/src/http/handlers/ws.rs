//! WebSocket chat channel.
//!
//! `GET /ws/chat?conversation_id=&user_id=` upgrades to a duplex channel
//! speaking the frame protocol: the client sends `{"message": "..."}` and
//! receives `delta* (done | error)` for each message.
//!
//! Without `conversation_id` the conversation is created on the first
//! message and reused for the rest of the connection. Messages that arrive
//! while a turn is streaming are queued and answered in order, so frames of
//! two turns never interleave on one channel. Closing the socket cancels the
//! active turn.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::future::ready;
use futures_util::{Sink, SinkExt, Stream, StreamExt, stream};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use domchat_core::chat::runtime::TurnRequest;
use domchat_types::frame::{ClientFrame, StreamFrame};

use crate::http::error::AppError;
use crate::http::extractors::user::UserId;
use crate::state::{AppState, ConcreteRuntime};

pub const INVALID_FORMAT: &str = "Invalid message format";

type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// A queued client frame.
#[derive(Debug)]
enum Inbound {
    Message(String),
    Malformed,
}

impl Inbound {
    fn parse(text: &str) -> Self {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => Inbound::Message(frame.message),
            Err(err) => {
                tracing::debug!(error = %err, "Malformed client frame");
                Inbound::Malformed
            }
        }
    }
}

/// Upgrade to the chat channel. The connection is bound to the session that
/// is active at connect time.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    UserId(user): UserId,
    Query(params): Query<ChatParams>,
) -> Result<Response, AppError> {
    let conversation_id = params
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .map(|id| {
            id.trim()
                .parse::<Uuid>()
                .map_err(|_| AppError::Validation(format!("Invalid UUID: {id}")))
        })
        .transpose()?;
    let runtime = state.runtime().await;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, runtime, user, conversation_id)))
}

async fn handle_socket(
    socket: WebSocket,
    runtime: ConcreteRuntime,
    user: String,
    conversation_id: Option<Uuid>,
) {
    let (sender, receiver) = socket.split();

    let inbound = Box::pin(
        receiver
            .take_while(|msg| ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
            .filter_map(|msg| {
                ready(match msg {
                    Ok(Message::Text(text)) => Some(text.to_string()),
                    // Binary and control frames carry no chat messages.
                    _ => None,
                })
            }),
    );
    let outbound = Box::pin(sender.with(|frame: StreamFrame| {
        ready(
            serde_json::to_string(&frame)
                .map(|json| Message::Text(json.into()))
                .map_err(axum::Error::new),
        )
    }));

    tracing::debug!(%user, ?conversation_id, "Chat channel opened");
    run_channel(runtime, user, conversation_id, inbound, outbound).await;
    tracing::debug!("Chat channel closed");
}

/// Serve one channel until the client goes away.
///
/// `inbound` yields raw text frames and ends when the client disconnects.
pub async fn run_channel<I, O>(
    runtime: ConcreteRuntime,
    user: String,
    mut conversation_id: Option<Uuid>,
    mut inbound: I,
    mut outbound: O,
) where
    I: Stream<Item = String> + Unpin,
    O: Sink<StreamFrame> + Unpin,
    O::Error: fmt::Debug,
{
    let cancel = CancellationToken::new();
    let mut pending: VecDeque<Inbound> = VecDeque::new();
    let mut active: Option<FrameStream> = None;

    loop {
        if active.is_none() {
            if let Some(next) = pending.pop_front() {
                active = Some(
                    start_turn(&runtime, &user, &mut conversation_id, next, cancel.child_token())
                        .await,
                );
            }
        }

        tokio::select! {
            frame = next_frame(&mut active) => match frame {
                Some(frame) => {
                    let terminal = frame.is_terminal();
                    if let Err(err) = outbound.send(frame).await {
                        tracing::debug!(error = ?err, "Client stopped accepting frames");
                        break;
                    }
                    if terminal {
                        active = None;
                    }
                }
                None => active = None,
            },
            input = inbound.next() => match input {
                Some(text) => pending.push_back(Inbound::parse(&text)),
                None => break,
            },
        }
    }

    cancel.cancel();
    if let Some(mut frames) = active.take() {
        // Let the cancelled turn settle so its partition handle is released
        // before the connection task ends.
        while let Some(frame) = frames.next().await {
            if frame.is_terminal() {
                break;
            }
        }
    }
    if !pending.is_empty() {
        tracing::debug!(dropped = pending.len(), "Discarding queued messages on close");
    }
}

async fn start_turn(
    runtime: &ConcreteRuntime,
    user: &str,
    conversation_id: &mut Option<Uuid>,
    input: Inbound,
    cancel: CancellationToken,
) -> FrameStream {
    let message = match input {
        Inbound::Message(message) => message,
        Inbound::Malformed => return single(StreamFrame::error(INVALID_FORMAT)),
    };

    let request = TurnRequest {
        user_id: user.to_string(),
        conversation_id: *conversation_id,
        message,
    };
    match runtime.begin(request).await {
        Ok(turn) => {
            *conversation_id = Some(turn.conversation().id);
            Box::pin(turn.into_frames(cancel))
        }
        Err(err) => {
            tracing::warn!(error = %err, ?conversation_id, "Turn rejected");
            single(StreamFrame::error(err.client_message()))
        }
    }
}

fn single(frame: StreamFrame) -> FrameStream {
    Box::pin(stream::once(ready(frame)))
}

async fn next_frame(active: &mut Option<FrameStream>) -> Option<StreamFrame> {
    match active {
        Some(frames) => frames.next().await,
        None => std::future::pending().await,
    }
}
