//! Application state wiring the resolver, capabilities, storage and the
//! turn runtime together.
//!
//! AppState is shared by the CLI commands and the HTTP/WebSocket server. The
//! runtime is generic over the conversation repository; AppState pins it to
//! the SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;

use domchat_core::capability::{CapabilityLoader, CapabilityRegistry};
use domchat_core::chat::runtime::TurnRuntime;
use domchat_core::chat::service::ConversationService;
use domchat_core::config::ConfigResolver;
use domchat_core::llm::GenerationBackend;
use domchat_core::partition::PartitionAccess;
use domchat_core::session::SessionAssembler;
use domchat_infra::capability::builtin_registry;
use domchat_infra::config::{FsConfigSource, ProcessEnv};
use domchat_infra::llm::create_backend;
use domchat_infra::sqlite::pool::database_url;
use domchat_infra::sqlite::{DatabasePool, SqliteConversationRepository, SqlitePartitionAccess};
use domchat_types::bundle::ConfigBundle;
use domchat_types::config::AppSettings;
use domchat_types::error::ConfigError;

pub type ConcreteResolver = ConfigResolver<FsConfigSource, ProcessEnv>;
pub type ConcreteRuntime = TurnRuntime<SqliteConversationRepository>;
pub type ConcreteConversationService = ConversationService<SqliteConversationRepository>;

/// The session every new connection is built from, plus the capability
/// warnings produced while loading it.
#[derive(Clone)]
pub struct ActiveSession {
    pub runtime: ConcreteRuntime,
    pub warnings: Vec<String>,
}

impl ActiveSession {
    pub fn bundle(&self) -> &ConfigBundle {
        self.runtime.session().bundle()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<ConcreteResolver>,
    pub settings: Arc<AppSettings>,
    pub conversations: Arc<ConcreteConversationService>,
    loader: Arc<CapabilityLoader>,
    access: Arc<dyn PartitionAccess>,
    domain_override: Option<String>,
    active: Arc<RwLock<ActiveSession>>,
}

impl AppState {
    /// Resolve the active bundle from `config_dir`, open the databases and
    /// assemble the session. `domain` overrides `app.active_domain`.
    pub async fn init(config_dir: &Path, domain: Option<String>) -> anyhow::Result<Self> {
        let resolver = ConfigResolver::new(FsConfigSource::new(config_dir), ProcessEnv);
        let settings = resolver
            .app_settings()
            .await
            .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
        let backend = create_backend(&settings.llm, |name| std::env::var(name).ok());
        Self::with_backend(resolver, domain, backend).await
    }

    /// Same as [`AppState::init`] with an explicit generation backend.
    pub async fn with_backend(
        resolver: ConcreteResolver,
        domain: Option<String>,
        backend: Arc<dyn GenerationBackend>,
    ) -> anyhow::Result<Self> {
        let settings = resolver.app_settings().await?;

        let db_path = PathBuf::from(&settings.database.path);
        let db_pool = DatabasePool::open(&db_path)
            .await
            .with_context(|| format!("opening database {}", db_path.display()))?;
        let access: Arc<dyn PartitionAccess> = Arc::new(
            SqlitePartitionAccess::new(&database_url(&db_path), &settings.database.partitions_dir)
                .await
                .context("preparing partition databases")?,
        );

        let registry: Arc<CapabilityRegistry> = Arc::new(builtin_registry());
        let loader = Arc::new(CapabilityLoader::new(registry));
        let conversations = Arc::new(ConversationService::new(SqliteConversationRepository::new(
            db_pool,
        )));

        let resolver = Arc::new(resolver);
        let bundle_id = match &domain {
            Some(id) => id.clone(),
            None => resolver.active_bundle_id().await?,
        };
        let bundle = resolver.resolve(&bundle_id).await?;
        let (session, warnings) = assemble(&loader, &access, bundle)?;
        let runtime = TurnRuntime::new(Arc::new(session), backend, Arc::clone(&conversations));

        Ok(Self {
            resolver,
            settings,
            conversations,
            loader,
            access,
            domain_override: domain,
            active: Arc::new(RwLock::new(ActiveSession { runtime, warnings })),
        })
    }

    /// Snapshot of the current session. Connections keep the snapshot they
    /// took for their whole lifetime.
    pub async fn session(&self) -> ActiveSession {
        self.active.read().await.clone()
    }

    pub async fn runtime(&self) -> ConcreteRuntime {
        self.active.read().await.runtime.clone()
    }

    /// Drop cached configuration and rebuild the session from the current
    /// documents. On failure the previous session stays in place.
    pub async fn reload(&self) -> Result<ActiveSession, ConfigError> {
        self.resolver.reload().await;
        let bundle_id = match &self.domain_override {
            Some(id) => id.clone(),
            None => self.resolver.active_bundle_id().await?,
        };
        let bundle = self.resolver.resolve(&bundle_id).await?;
        let (session, warnings) = assemble(&self.loader, &self.access, bundle)?;

        let mut active = self.active.write().await;
        *active = ActiveSession {
            runtime: active.runtime.with_session(Arc::new(session)),
            warnings,
        };
        tracing::info!(bundle = %bundle_id, "Active session replaced");
        Ok(active.clone())
    }
}

fn assemble(
    loader: &CapabilityLoader,
    access: &Arc<dyn PartitionAccess>,
    bundle: Arc<ConfigBundle>,
) -> Result<(domchat_core::session::SessionDescriptor, Vec<String>), ConfigError> {
    let loaded = loader.load(&bundle);
    let session = SessionAssembler::assemble(bundle, loaded.capabilities, Arc::clone(access))?;
    Ok((session, loaded.warnings))
}
