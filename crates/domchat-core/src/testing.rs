//! In-memory fakes shared by the unit tests in this crate.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use uuid::Uuid;

use domchat_types::bundle::{
    AgentSettings, BundleDisplay, ConfigBundle, InstructionTemplate, UiMetadata,
};
use domchat_types::capability::CapabilitySpec;
use domchat_types::chat::{Conversation, ConversationFilter, Message};
use domchat_types::config::{LlmSettings, RuntimeSettings};
use domchat_types::error::{CapabilityError, PartitionError, RepositoryError};
use domchat_types::llm::{GenerationEvent, GenerationRequest, LlmError};

use crate::capability::Capability;
use crate::chat::repository::ConversationRepository;
use crate::llm::backend::{GenerationBackend, GenerationStream};
use crate::partition::{PartitionAccess, PartitionCatalog, Row, ScopedStore, SearchScope};

/// A bundle on `partition` declaring `capabilities`, defining `templates`
/// but listing none of them in `template_keys`.
pub fn bundle_with(
    partition: &str,
    capabilities: &[&str],
    templates: &[(&str, &str)],
) -> ConfigBundle {
    let templates: BTreeMap<String, InstructionTemplate> = templates
        .iter()
        .map(|(key, text)| {
            (
                key.to_string(),
                InstructionTemplate {
                    key: key.to_string(),
                    version: None,
                    text: text.to_string(),
                },
            )
        })
        .collect();

    ConfigBundle {
        id: "test-bundle".to_string(),
        display: BundleDisplay {
            name: "Test".to_string(),
            description: String::new(),
            version: None,
            author: None,
        },
        agent: AgentSettings {
            name: "TestAgent".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_tokens: 256,
        },
        base_instructions: "Base instructions.".to_string(),
        template_keys: Vec::new(),
        templates,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        partition: partition.to_string(),
        ui: UiMetadata::default(),
        llm: LlmSettings::default(),
        runtime: RuntimeSettings::default(),
    }
}

fn spec(name: &str, purpose: &str) -> CapabilitySpec {
    CapabilitySpec {
        name: name.to_string(),
        description: purpose.to_string(),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

/// Returns its arguments and the partition it ran on.
pub struct EchoCapability {
    spec: CapabilitySpec,
}

impl EchoCapability {
    pub fn named(name: &str) -> Self {
        Self::with_purpose(name, "Echo the arguments back")
    }

    pub fn with_purpose(name: &str, purpose: &str) -> Self {
        Self {
            spec: spec(name, purpose),
        }
    }
}

impl Capability for EchoCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        Ok(json!({ "echo": arguments, "partition": store.partition() }))
    }
}

/// Runs one fixed query through the handle it is given.
pub struct TableCapability {
    spec: CapabilitySpec,
    sql: String,
}

impl TableCapability {
    pub fn new(name: &str, sql: &str) -> Self {
        Self {
            spec: spec(name, "Run a fixed query"),
            sql: sql.to_string(),
        }
    }
}

impl Capability for TableCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        _arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        let rows = store.fetch_all(&self.sql, &[]).await?;
        Ok(json!({ "rows": rows }))
    }
}

/// Never completes while holding its handle.
pub struct HangingCapability {
    spec: CapabilitySpec,
}

impl HangingCapability {
    pub fn named(name: &str) -> Self {
        Self {
            spec: spec(name, "Never returns"),
        }
    }
}

impl Capability for HangingCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        _arguments: Value,
        _store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        std::future::pending().await
    }
}

/// Partition access over a fixed catalog. Queries are rendered (and so
/// scope-checked) and recorded, then return no rows.
pub struct MemoryPartitionAccess {
    catalog: Arc<PartitionCatalog>,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MemoryPartitionAccess {
    pub fn new() -> Self {
        let catalog = PartitionCatalog::new()
            .with_table("main", "conversations")
            .with_table("main", "messages")
            .with_table("horse_racing", "races")
            .with_table("horse_racing", "race_results")
            .with_table("customer_support", "support_tickets")
            .with_table("customer_support", "orders");
        Self {
            catalog: Arc::new(catalog),
            opened: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handles opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet dropped.
    pub fn open_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Rendered SQL of every statement run, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl PartitionAccess for MemoryPartitionAccess {
    fn open<'a>(
        &'a self,
        partition: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ScopedStore>, PartitionError>> {
        Box::pin(async move {
            let scope = SearchScope::for_partition(partition)?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryStore {
                scope,
                catalog: Arc::clone(&self.catalog),
                live: Arc::clone(&self.live),
                executed: Arc::clone(&self.executed),
            }) as Box<dyn ScopedStore>)
        })
    }
}

struct MemoryStore {
    scope: SearchScope,
    catalog: Arc<PartitionCatalog>,
    live: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    fn record(&self, sql: &str) -> Result<(), PartitionError> {
        let rendered = self.scope.render(&self.catalog, sql)?;
        self.executed.lock().unwrap().push(rendered);
        Ok(())
    }
}

impl ScopedStore for MemoryStore {
    fn scope(&self) -> &SearchScope {
        &self.scope
    }

    fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
        _params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, PartitionError>> {
        Box::pin(async move {
            self.record(sql)?;
            Ok(Vec::new())
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        _params: &'a [Value],
    ) -> BoxFuture<'a, Result<u64, PartitionError>> {
        Box::pin(async move {
            self.record(sql)?;
            Ok(1)
        })
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One scripted generation round.
pub struct Script {
    events: Vec<Result<GenerationEvent, LlmError>>,
}

impl Script {
    pub fn events(events: Vec<Result<GenerationEvent, LlmError>>) -> Self {
        Self { events }
    }

    fn replay(&self) -> Vec<Result<GenerationEvent, LlmError>> {
        self.events
            .iter()
            .map(|event| match event {
                Ok(event) => Ok(event.clone()),
                Err(e) => Err(LlmError::Stream(e.to_string())),
            })
            .collect()
    }
}

/// Plays back one script per `stream` call and records every request.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Option<Script>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every round with the same script.
    pub fn repeating(script: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            repeat: Some(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream(&self, request: GenerationRequest) -> GenerationStream {
        self.requests.lock().unwrap().push(request);
        let events = match self.scripts.lock().unwrap().pop_front() {
            Some(script) => script.events,
            None => match &self.repeat {
                Some(script) => script.replay(),
                None => vec![Err(LlmError::Provider {
                    message: "script exhausted".to_string(),
                })],
            },
        };
        Box::pin(futures_util::stream::iter(events))
    }
}

/// Conversation storage in two vectors, with the ordering and cascade
/// behaviour of the SQLite implementation.
#[derive(Default)]
pub struct MemoryConversationRepository {
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<Vec<Message>>,
    reject_appends: AtomicBool,
}

impl MemoryConversationRepository {
    /// Make every later `append_message` fail with a query error.
    pub fn reject_appends(&self) {
        self.reject_appends.store(true, Ordering::SeqCst);
    }
}

impl ConversationRepository for MemoryConversationRepository {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.lock().unwrap();
        if conversations.iter().any(|c| c.id == conversation.id) {
            return Err(RepositoryError::Conflict(conversation.id.to_string()));
        }
        conversations.push(conversation.clone());
        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == *id)
            .cloned())
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        filter: &ConversationFilter,
    ) -> Result<(Vec<Conversation>, u64), RepositoryError> {
        let mut matching: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .filter(|c| filter.partition.as_deref().is_none_or(|p| c.partition == p))
            .filter(|c| filter.include_archived || !c.is_archived)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.lock().unwrap();
        let slot = conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = conversation.clone();
        Ok(())
    }

    async fn delete_conversation(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.lock().unwrap();
        let before = conversations.len();
        conversations.retain(|c| c.id != *id);
        if conversations.len() == before {
            return Err(RepositoryError::NotFound);
        }
        self.messages
            .lock()
            .unwrap()
            .retain(|m| m.conversation_id != *id);
        Ok(())
    }

    async fn append_message(
        &self,
        message: &Message,
        retitle: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if self.reject_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("disk I/O error".to_string()));
        }
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.message_count += 1;
        conversation.updated_at = message.created_at;
        if let Some(title) = retitle {
            conversation.title = title.to_string();
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, conversation_id: &Uuid) -> Result<Vec<Message>, RepositoryError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .cloned()
            .collect())
    }

    async fn recent_messages(
        &self,
        conversation_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let all = self.get_messages(conversation_id).await?;
        let skip = all.len().saturating_sub(limit as usize);
        Ok(all.into_iter().skip(skip).collect())
    }
}
