//! The streaming turn runtime.
//!
//! One turn takes one user message to exactly one terminal frame. The user
//! message is persisted before generation starts. Answer text is forwarded
//! as `delta` frames in arrival order; capability calls requested by the
//! model are executed against a freshly opened partition handle and fed
//! back until the model produces a final answer or the round bound is hit.
//! The assistant message is persisted before `done` is emitted, so a client
//! that receives `done` can always re-read the full answer.
//!
//! A conversation runs at most one turn at a time. A second `begin` while a
//! turn is active fails with [`TurnError::Busy`].

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use dashmap::DashSet;
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use domchat_types::capability::CapabilityOutput;
use domchat_types::chat::{Conversation, Message};
use domchat_types::error::{CapabilityError, PartitionError, RepositoryError, ServiceError, TurnError};
use domchat_types::frame::StreamFrame;
use domchat_types::llm::{CapabilityCall, ContextMessage, GenerationEvent, GenerationRequest};

use crate::chat::repository::ConversationRepository;
use crate::chat::sequencer::FrameSequencer;
use crate::chat::service::ConversationService;
use crate::llm::backend::GenerationBackend;
use crate::llm::span::StreamInSpan;
use crate::session::SessionDescriptor;

/// Inbound message for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    /// `None` starts a new conversation on the session's partition.
    pub conversation_id: Option<Uuid>,
    pub message: String,
}

/// Progress reported by the generation loop to the frame producer.
enum GenerationStep {
    Text(String),
    Capability(String),
    Failed(TurnError),
}

/// What the frame producer saw on one poll.
enum Polled {
    Cancelled,
    Step(GenerationStep),
    Finished,
}

/// Marks a conversation as having a turn in flight. Released on drop, which
/// covers completion, failure and a dropped frame stream alike.
struct ActiveTurnGuard {
    active: Arc<DashSet<Uuid>>,
    conversation_id: Uuid,
}

impl ActiveTurnGuard {
    fn try_acquire(active: &Arc<DashSet<Uuid>>, conversation_id: Uuid) -> Option<Self> {
        active.insert(conversation_id).then(|| Self {
            active: Arc::clone(active),
            conversation_id,
        })
    }
}

impl Drop for ActiveTurnGuard {
    fn drop(&mut self) {
        self.active.remove(&self.conversation_id);
    }
}

pub struct TurnRuntime<R: ConversationRepository> {
    session: Arc<SessionDescriptor>,
    backend: Arc<dyn GenerationBackend>,
    conversations: Arc<ConversationService<R>>,
    active: Arc<DashSet<Uuid>>,
}

impl<R: ConversationRepository> Clone for TurnRuntime<R> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            backend: Arc::clone(&self.backend),
            conversations: Arc::clone(&self.conversations),
            active: Arc::clone(&self.active),
        }
    }
}

impl<R: ConversationRepository + 'static> TurnRuntime<R> {
    pub fn new(
        session: Arc<SessionDescriptor>,
        backend: Arc<dyn GenerationBackend>,
        conversations: Arc<ConversationService<R>>,
    ) -> Self {
        Self {
            session,
            backend,
            conversations,
            active: Arc::new(DashSet::new()),
        }
    }

    /// Same backend, store and turn gate with a new session. Turns already
    /// streaming keep the session they started with.
    pub fn with_session(&self, session: Arc<SessionDescriptor>) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    pub fn session(&self) -> &SessionDescriptor {
        &self.session
    }

    pub fn conversations(&self) -> &ConversationService<R> {
        &self.conversations
    }

    /// Whether a turn is currently in flight for `conversation_id`.
    pub fn is_active(&self, conversation_id: &Uuid) -> bool {
        self.active.contains(conversation_id)
    }

    /// Validate the request, resolve (or create) the conversation, claim it
    /// and persist the user message.
    ///
    /// Nothing is persisted when this returns an error: a conversation
    /// created here is deleted again if the claim or the user message fails.
    pub async fn begin(&self, request: TurnRequest) -> Result<Turn<R>, TurnError> {
        let content = request.message.trim();
        if content.is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let created = request.conversation_id.is_none();
        let conversation = match request.conversation_id {
            Some(id) => {
                let conversation = self
                    .conversations
                    .get_owned(&request.user_id, &id)
                    .await
                    .map_err(service_error)?;
                if conversation.partition != self.session.partition() {
                    warn!(
                        conversation_id = %id,
                        conversation_partition = %conversation.partition,
                        session_partition = %self.session.partition(),
                        "Conversation belongs to another partition"
                    );
                    return Err(TurnError::ConversationNotFound);
                }
                conversation
            }
            None => self
                .conversations
                .create(&request.user_id, self.session.partition(), None)
                .await
                .map_err(service_error)?,
        };

        let Some(guard) = ActiveTurnGuard::try_acquire(&self.active, conversation.id) else {
            if created {
                self.discard(&request.user_id, &conversation).await;
            }
            return Err(TurnError::Busy);
        };

        let user_message = match self
            .conversations
            .append_user_message(&conversation, content)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                drop(guard);
                if created {
                    self.discard(&request.user_id, &conversation).await;
                }
                return Err(e.into());
            }
        };

        Ok(Turn {
            runtime: self.clone(),
            conversation,
            user_message,
            guard,
        })
    }

    async fn discard(&self, user_id: &str, conversation: &Conversation) {
        if let Err(e) = self.conversations.delete(user_id, &conversation.id).await {
            warn!(
                conversation_id = %conversation.id,
                error = %e,
                "Failed to remove conversation after aborted turn"
            );
        }
    }

    /// Begin a turn and stream its frames. A failure to begin becomes a
    /// single `error` frame.
    pub fn run(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let runtime = self.clone();
        stream! {
            match runtime.begin(request).await {
                Ok(turn) => {
                    let mut frames = Box::pin(turn.into_frames(cancel));
                    while let Some(frame) = frames.next().await {
                        yield frame;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Turn rejected");
                    yield StreamFrame::error(e.client_message());
                }
            }
        }
    }

    /// The bounded generate / invoke-capabilities loop.
    fn generate(
        &self,
        conversation_id: Uuid,
    ) -> Pin<Box<dyn Stream<Item = GenerationStep> + Send + 'static>> {
        let session = Arc::clone(&self.session);
        let backend = Arc::clone(&self.backend);
        let conversations = Arc::clone(&self.conversations);

        Box::pin(stream! {
            let settings = session.bundle().runtime;
            let history = match conversations
                .history(&conversation_id, settings.history_limit)
                .await
            {
                Ok(history) => history,
                Err(e) => {
                    yield GenerationStep::Failed(e.into());
                    return;
                }
            };

            let mut transcript: Vec<ContextMessage> =
                history.iter().map(ContextMessage::from).collect();
            let specs = session.capability_specs();
            let max_rounds = settings.max_generation_iterations.max(1);

            for round in 1..=max_rounds {
                let agent = &session.bundle().agent;
                let request = GenerationRequest {
                    model: agent.model.clone(),
                    temperature: agent.temperature,
                    max_tokens: agent.max_tokens,
                    instructions: session.instructions().to_string(),
                    capabilities: specs.clone(),
                    transcript: transcript.clone(),
                };
                debug!(round, transcript_len = request.transcript.len(), "Generation round");

                let mut events = backend.stream(request);
                let mut round_text = String::new();
                let mut calls: Vec<CapabilityCall> = Vec::new();
                let mut failure = None;

                while let Some(event) = events.next().await {
                    match event {
                        Ok(GenerationEvent::TextDelta { text }) => {
                            if text.is_empty() {
                                continue;
                            }
                            round_text.push_str(&text);
                            yield GenerationStep::Text(text);
                        }
                        Ok(GenerationEvent::CapabilityCall(call)) => calls.push(call),
                        Ok(GenerationEvent::Done) => break,
                        Err(e) => {
                            failure = Some(TurnError::Generation(e));
                            break;
                        }
                    }
                }
                drop(events);

                if let Some(e) = failure {
                    yield GenerationStep::Failed(e);
                    return;
                }
                if calls.is_empty() {
                    return;
                }

                transcript.push(ContextMessage::Assistant {
                    content: round_text,
                    capability_calls: calls.clone(),
                });
                for call in &calls {
                    yield GenerationStep::Capability(call.name.clone());
                    match invoke_capability(&session, call).await {
                        Ok(output) => transcript.push(ContextMessage::CapabilityResult {
                            call_id: output.call_id,
                            name: output.name,
                            content: output.content.to_string(),
                        }),
                        Err(e) => {
                            yield GenerationStep::Failed(e);
                            return;
                        }
                    }
                }
            }

            yield GenerationStep::Failed(TurnError::GenerationLoopExceeded(max_rounds));
        })
    }
}

/// A claimed, started turn. Dropping it without streaming releases the claim.
pub struct Turn<R: ConversationRepository> {
    runtime: TurnRuntime<R>,
    conversation: Conversation,
    user_message: Message,
    guard: ActiveTurnGuard,
}

impl<R: ConversationRepository + 'static> Turn<R> {
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn user_message(&self) -> &Message {
        &self.user_message
    }

    /// Drive the turn to completion, yielding `delta* (done | error)`.
    ///
    /// Cancelling `cancel` stops generation, drops any open partition
    /// handle and ends the turn with a `ChannelClosed` error frame.
    pub fn into_frames(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let Turn {
            runtime,
            conversation,
            user_message,
            guard,
        } = self;

        let span = info_span!(
            "turn",
            conversation_id = %conversation.id,
            message_id = %user_message.id,
            bundle = %runtime.session.bundle().id,
            partition = %runtime.session.partition(),
            model = %runtime.session.bundle().agent.model,
        );

        let frames = stream! {
            let _guard = guard;
            let started = Instant::now();
            let mut sequencer = FrameSequencer::new();
            let mut answer = String::new();
            let mut used: Vec<String> = Vec::new();
            let mut failure: Option<TurnError> = None;

            let mut steps = runtime.generate(conversation.id);
            loop {
                let polled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Polled::Cancelled,
                    step = steps.next() => match step {
                        Some(step) => Polled::Step(step),
                        None => Polled::Finished,
                    },
                };

                match polled {
                    Polled::Cancelled => {
                        failure = Some(TurnError::ChannelClosed);
                        break;
                    }
                    Polled::Finished => break,
                    Polled::Step(GenerationStep::Text(text)) => {
                        answer.push_str(&text);
                        if let Some(frame) = sequencer.admit(StreamFrame::delta(text)) {
                            yield frame;
                        }
                    }
                    Polled::Step(GenerationStep::Capability(name)) => {
                        if !used.contains(&name) {
                            used.push(name);
                        }
                    }
                    Polled::Step(GenerationStep::Failed(e)) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            // Releases any partition handle still held by an in-flight capability.
            drop(steps);

            let terminal = match failure {
                None => {
                    let metadata = (!used.is_empty()).then(|| json!({ "capabilities": used }));
                    match runtime
                        .conversations
                        .append_assistant_message(conversation.id, &answer, metadata)
                        .await
                    {
                        Ok(message) => {
                            info!(
                                message_id = %message.id,
                                answer_chars = answer.chars().count(),
                                capabilities = used.len(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Turn completed"
                            );
                            StreamFrame::Done
                        }
                        Err(e) => {
                            let e = TurnError::from(e);
                            error!(error = %e, "Failed to persist assistant message");
                            StreamFrame::error(e.client_message())
                        }
                    }
                }
                Some(e) => {
                    match &e {
                        TurnError::ChannelClosed => info!("Turn cancelled, channel closed"),
                        TurnError::GenerationLoopExceeded(rounds) => {
                            warn!(rounds, "Generation loop bound reached")
                        }
                        other => error!(error = %other, "Turn failed"),
                    }
                    StreamFrame::error(e.client_message())
                }
            };

            if let Some(frame) = sequencer.admit(terminal) {
                yield frame;
            }
        };

        StreamInSpan::new(frames, span)
    }
}

/// Execute one capability call on a fresh handle.
///
/// Unknown names and capability failures go back to the model as error
/// results. A partition access violation ends the turn.
async fn invoke_capability(
    session: &SessionDescriptor,
    call: &CapabilityCall,
) -> Result<CapabilityOutput, TurnError> {
    let Some(capability) = session.capability(&call.name) else {
        warn!(capability = %call.name, "Model requested an unavailable capability");
        return Ok(error_output(
            call,
            format!("capability '{}' is not available", call.name),
        ));
    };

    let started = Instant::now();
    let mut handle = session.open_partition().await?;
    let result = capability.invoke(call.arguments.clone(), handle.as_mut()).await;
    drop(handle);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(content) => {
            info!(capability = %call.name, elapsed_ms, "Capability invoked");
            Ok(CapabilityOutput {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: false,
            })
        }
        Err(CapabilityError::Partition(violation @ PartitionError::AccessViolation { .. })) => {
            error!(capability = %call.name, error = %violation, "Partition access violation");
            Err(TurnError::Partition(violation))
        }
        Err(e) => {
            warn!(capability = %call.name, elapsed_ms, error = %e, "Capability failed");
            Ok(error_output(call, e.to_string()))
        }
    }
}

fn error_output(call: &CapabilityCall, message: String) -> CapabilityOutput {
    CapabilityOutput {
        call_id: call.id.clone(),
        name: call.name.clone(),
        content: json!({ "error": message }),
        is_error: true,
    }
}

fn service_error(e: ServiceError) -> TurnError {
    match e {
        ServiceError::NotFound => TurnError::ConversationNotFound,
        ServiceError::Validation(reason) => TurnError::Storage(RepositoryError::Query(reason)),
        ServiceError::Repository(e) => TurnError::Storage(e),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use domchat_types::chat::MessageRole;
    use domchat_types::llm::LlmError;

    use super::*;
    use crate::chat::repository::ConversationRepository;
    use crate::session::SessionAssembler;
    use crate::testing::{
        EchoCapability, HangingCapability, MemoryConversationRepository, MemoryPartitionAccess,
        Script, ScriptedBackend, TableCapability, bundle_with,
    };

    struct Harness {
        runtime: TurnRuntime<MemoryConversationRepository>,
        backend: Arc<ScriptedBackend>,
        access: Arc<MemoryPartitionAccess>,
    }

    fn harness(
        capabilities: Vec<crate::capability::CapabilityDescriptor>,
        backend: ScriptedBackend,
        max_rounds: u32,
    ) -> Harness {
        let mut bundle = bundle_with("horse_racing", &[], &[]);
        bundle.runtime.max_generation_iterations = max_rounds;
        let access = Arc::new(MemoryPartitionAccess::new());
        let session = SessionAssembler::assemble(
            Arc::new(bundle),
            capabilities,
            access.clone() as Arc<dyn crate::partition::PartitionAccess>,
        )
        .unwrap();
        let backend = Arc::new(backend);
        let runtime = TurnRuntime::new(
            Arc::new(session),
            backend.clone() as Arc<dyn GenerationBackend>,
            Arc::new(ConversationService::new(MemoryConversationRepository::default())),
        );
        Harness {
            runtime,
            backend,
            access,
        }
    }

    fn request(conversation_id: Option<Uuid>, message: &str) -> TurnRequest {
        TurnRequest {
            user_id: "alice".to_string(),
            conversation_id,
            message: message.to_string(),
        }
    }

    fn text(s: &str) -> Result<GenerationEvent, LlmError> {
        Ok(GenerationEvent::TextDelta {
            text: s.to_string(),
        })
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> Result<GenerationEvent, LlmError> {
        Ok(GenerationEvent::CapabilityCall(CapabilityCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }))
    }

    fn done() -> Result<GenerationEvent, LlmError> {
        Ok(GenerationEvent::Done)
    }

    async fn messages(h: &Harness, id: &Uuid) -> Vec<Message> {
        h.runtime.conversations().repo().get_messages(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_fresh_conversation_streams_and_persists_in_order() {
        let h = harness(
            vec![],
            ScriptedBackend::new(vec![Script::events(vec![text("Hi"), text(" there"), done()])]),
            4,
        );

        let turn = h.runtime.begin(request(None, "hello")).await.unwrap();
        let id = turn.conversation().id;
        let mut frames = Box::pin(turn.into_frames(CancellationToken::new()));

        let first = frames.next().await.unwrap();
        assert_eq!(first, StreamFrame::delta("Hi"));
        let stored = messages(&h, &id).await;
        assert_eq!(stored.len(), 1, "only the user message before the answer completes");
        assert_eq!(stored[0].role, MessageRole::User);
        assert_eq!(stored[0].content, "hello");

        assert_eq!(frames.next().await.unwrap(), StreamFrame::delta(" there"));
        assert_eq!(frames.next().await.unwrap(), StreamFrame::Done);
        let stored = messages(&h, &id).await;
        assert_eq!(stored.len(), 2, "assistant persisted by the time done arrives");
        assert_eq!(stored[1].role, MessageRole::Assistant);
        assert_eq!(stored[1].content, "Hi there");
        assert!(stored[1].metadata.is_none());

        assert!(frames.next().await.is_none());
        assert!(!h.runtime.is_active(&id));

        let conversation = h.runtime.conversations().get_owned("alice", &id).await.unwrap();
        assert_eq!(conversation.title, "hello");
        assert_eq!(conversation.partition, "horse_racing");
    }

    #[tokio::test]
    async fn test_history_is_sent_to_backend() {
        let h = harness(
            vec![],
            ScriptedBackend::new(vec![
                Script::events(vec![text("first"), done()]),
                Script::events(vec![text("second"), done()]),
            ]),
            4,
        );

        let turn = h.runtime.begin(request(None, "one")).await.unwrap();
        let id = turn.conversation().id;
        let _: Vec<_> = turn.into_frames(CancellationToken::new()).collect().await;

        let frames: Vec<_> = h
            .runtime
            .run(request(Some(id), "two"), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames.last(), Some(&StreamFrame::Done));

        let requests = h.backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].transcript,
            vec![
                ContextMessage::user("one"),
                ContextMessage::assistant("first"),
                ContextMessage::user("two"),
            ]
        );
        assert_eq!(requests[1].instructions, "Base instructions.");
    }

    #[tokio::test]
    async fn test_capability_round_feeds_result_back() {
        let h = harness(
            vec![crate::capability::CapabilityDescriptor::new(EchoCapability::named(
                "get_race_statistics",
            ))],
            ScriptedBackend::new(vec![
                Script::events(vec![
                    call("c1", "get_race_statistics", json!({"race_id": "R1"})),
                    done(),
                ]),
                Script::events(vec![text("Stats ready"), done()]),
            ]),
            4,
        );

        let turn = h.runtime.begin(request(None, "stats for R1")).await.unwrap();
        let id = turn.conversation().id;
        let frames: Vec<_> = turn.into_frames(CancellationToken::new()).collect().await;
        assert_eq!(frames, vec![StreamFrame::delta("Stats ready"), StreamFrame::Done]);

        assert_eq!(h.access.opened(), 1);
        assert_eq!(h.access.open_handles(), 0);

        let requests = h.backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].capabilities[0].name, "get_race_statistics");
        match requests[1].transcript.last().unwrap() {
            ContextMessage::CapabilityResult { call_id, name, content } => {
                assert_eq!(call_id, "c1");
                assert_eq!(name, "get_race_statistics");
                assert!(content.contains("R1"));
                assert!(content.contains("horse_racing"));
            }
            other => panic!("expected capability result, got {other:?}"),
        }

        let stored = messages(&h, &id).await;
        assert_eq!(
            stored[1].metadata,
            Some(json!({"capabilities": ["get_race_statistics"]}))
        );
    }

    #[tokio::test]
    async fn test_unknown_capability_is_reported_to_model() {
        let h = harness(
            vec![],
            ScriptedBackend::new(vec![
                Script::events(vec![call("c1", "not_loaded", json!({})), done()]),
                Script::events(vec![text("Sorry"), done()]),
            ]),
            4,
        );

        let frames: Vec<_> = h
            .runtime
            .run(request(None, "hi"), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames, vec![StreamFrame::delta("Sorry"), StreamFrame::Done]);
        assert_eq!(h.access.opened(), 0);

        let requests = h.backend.requests();
        match requests[1].transcript.last().unwrap() {
            ContextMessage::CapabilityResult { content, .. } => {
                assert!(content.contains("not available"));
            }
            other => panic!("expected capability result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_loop_bound_ends_turn_with_error() {
        let h = harness(
            vec![crate::capability::CapabilityDescriptor::new(EchoCapability::named("lookup"))],
            ScriptedBackend::repeating(Script::events(vec![
                text("checking"),
                call("c", "lookup", json!({})),
                done(),
            ])),
            2,
        );

        let turn = h.runtime.begin(request(None, "loop")).await.unwrap();
        let id = turn.conversation().id;
        let frames: Vec<_> = turn.into_frames(CancellationToken::new()).collect().await;

        assert_eq!(
            frames,
            vec![
                StreamFrame::delta("checking"),
                StreamFrame::delta("checking"),
                StreamFrame::error(TurnError::GenerationLoopExceeded(2).client_message()),
            ]
        );
        assert_eq!(h.backend.requests().len(), 2);
        assert_eq!(h.access.open_handles(), 0);

        let stored = messages(&h, &id).await;
        assert_eq!(stored.len(), 1, "no assistant message after a failed turn");
    }

    #[tokio::test]
    async fn test_backend_error_mid_stream() {
        let h = harness(
            vec![],
            ScriptedBackend::new(vec![Script::events(vec![
                text("partial"),
                Err(LlmError::Stream("connection reset".to_string())),
            ])]),
            4,
        );

        let turn = h.runtime.begin(request(None, "hi")).await.unwrap();
        let id = turn.conversation().id;
        let frames: Vec<_> = turn.into_frames(CancellationToken::new()).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], StreamFrame::delta("partial"));
        assert!(matches!(&frames[1], StreamFrame::Error { message }
            if message == "The assistant is unavailable right now"));
        assert_eq!(messages(&h, &id).await.len(), 1);
        assert!(!h.runtime.is_active(&id));
    }

    #[tokio::test]
    async fn test_second_turn_on_same_conversation_is_busy() {
        let h = harness(
            vec![],
            ScriptedBackend::repeating(Script::events(vec![text("ok"), done()])),
            4,
        );

        let first = h.runtime.begin(request(None, "one")).await.unwrap();
        let id = first.conversation().id;

        let second = h.runtime.begin(request(Some(id), "two")).await;
        assert!(matches!(second, Err(TurnError::Busy)));
        assert_eq!(messages(&h, &id).await.len(), 1, "rejected message not persisted");

        let frames: Vec<_> = h
            .runtime
            .run(request(Some(id), "two"), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames, vec![StreamFrame::error("A response is already in progress")]);

        let _: Vec<_> = first.into_frames(CancellationToken::new()).collect().await;
        assert!(h.runtime.begin(request(Some(id), "three")).await.is_ok());
    }

    #[tokio::test]
    async fn test_with_session_shares_turn_gate() {
        let h = harness(
            vec![],
            ScriptedBackend::repeating(Script::events(vec![text("ok"), done()])),
            4,
        );
        let first = h.runtime.begin(request(None, "one")).await.unwrap();
        let id = first.conversation().id;

        let session = Arc::new(h.runtime.session().clone());
        let reloaded = h.runtime.with_session(session);
        assert!(reloaded.is_active(&id));
        assert!(matches!(
            reloaded.begin(request(Some(id), "two")).await,
            Err(TurnError::Busy)
        ));

        drop(first);
        assert!(!reloaded.is_active(&id));
    }

    #[tokio::test]
    async fn test_dropping_unstarted_turn_releases_claim() {
        let h = harness(vec![], ScriptedBackend::new(vec![]), 4);
        let turn = h.runtime.begin(request(None, "one")).await.unwrap();
        let id = turn.conversation().id;
        assert!(h.runtime.is_active(&id));
        drop(turn);
        assert!(!h.runtime.is_active(&id));
    }

    #[tokio::test]
    async fn test_cancellation_releases_partition_handle() {
        let h = harness(
            vec![crate::capability::CapabilityDescriptor::new(HangingCapability::named("slow"))],
            ScriptedBackend::new(vec![Script::events(vec![
                text("working"),
                call("c1", "slow", json!({})),
                done(),
            ])]),
            4,
        );

        let turn = h.runtime.begin(request(None, "go")).await.unwrap();
        let id = turn.conversation().id;
        let cancel = CancellationToken::new();
        let mut frames = Box::pin(turn.into_frames(cancel.clone()));

        assert_eq!(frames.next().await.unwrap(), StreamFrame::delta("working"));

        let access = h.access.clone();
        let cancel_when_open = tokio::spawn(async move {
            while access.open_handles() == 0 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        });

        let last = frames.next().await.unwrap();
        assert_eq!(last, StreamFrame::error("Connection closed"));
        assert!(frames.next().await.is_none());
        cancel_when_open.await.unwrap();

        assert_eq!(h.access.opened(), 1);
        assert_eq!(h.access.open_handles(), 0);
        assert_eq!(messages(&h, &id).await.len(), 1);
        drop(frames);
        assert!(!h.runtime.is_active(&id));
    }

    #[tokio::test]
    async fn test_cross_partition_query_fails_turn() {
        let h = harness(
            vec![crate::capability::CapabilityDescriptor::new(TableCapability::new(
                "peek_tickets",
                "SELECT * FROM {customer_support.support_tickets}",
            ))],
            ScriptedBackend::new(vec![
                Script::events(vec![call("c1", "peek_tickets", json!({})), done()]),
                Script::events(vec![text("never"), done()]),
            ]),
            4,
        );

        let turn = h.runtime.begin(request(None, "show tickets")).await.unwrap();
        let id = turn.conversation().id;
        let frames: Vec<_> = turn.into_frames(CancellationToken::new()).collect().await;
        assert_eq!(frames, vec![StreamFrame::error("An internal error occurred")]);
        assert_eq!(h.backend.requests().len(), 1);
        assert_eq!(h.access.open_handles(), 0);
        assert_eq!(messages(&h, &id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_in_scope_query_succeeds() {
        let h = harness(
            vec![crate::capability::CapabilityDescriptor::new(TableCapability::new(
                "race_count",
                "SELECT count(*) FROM {races}",
            ))],
            ScriptedBackend::new(vec![
                Script::events(vec![call("c1", "race_count", json!({})), done()]),
                Script::events(vec![text("Counted"), done()]),
            ]),
            4,
        );

        let frames: Vec<_> = h
            .runtime
            .run(request(None, "count"), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames, vec![StreamFrame::delta("Counted"), StreamFrame::Done]);
        assert_eq!(
            h.access.executed(),
            vec![r#"SELECT count(*) FROM "horse_racing"."races""#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_without_side_effects() {
        let h = harness(vec![], ScriptedBackend::new(vec![]), 4);
        let result = h.runtime.begin(request(None, "   ")).await;
        assert!(matches!(result, Err(TurnError::EmptyMessage)));

        let page = h
            .runtime
            .conversations()
            .list("alice", Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        let frames: Vec<_> = h
            .runtime
            .run(request(None, ""), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(frames, vec![StreamFrame::error("Message is required")]);
    }

    #[tokio::test]
    async fn test_failed_user_message_leaves_no_conversation_behind() {
        let h = harness(vec![], ScriptedBackend::new(vec![]), 4);
        h.runtime.conversations().repo().reject_appends();

        let result = h.runtime.begin(request(None, "Who won the 3:15?")).await;
        assert!(matches!(result, Err(TurnError::Storage(RepositoryError::Query(_)))));

        let page = h
            .runtime
            .conversations()
            .list("alice", Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_of_other_user_or_partition_is_not_found() {
        let h = harness(vec![], ScriptedBackend::new(vec![]), 4);
        let service = h.runtime.conversations();

        let foreign_user = service.create("bob", "horse_racing", None).await.unwrap();
        let result = h.runtime.begin(request(Some(foreign_user.id), "hi")).await;
        assert!(matches!(result, Err(TurnError::ConversationNotFound)));

        let foreign_partition = service.create("alice", "customer_support", None).await.unwrap();
        let result = h.runtime.begin(request(Some(foreign_partition.id), "hi")).await;
        assert!(matches!(result, Err(TurnError::ConversationNotFound)));
        assert!(messages(&h, &foreign_partition.id).await.is_empty());

        assert_eq!(h.access.opened(), 0);
    }
}
