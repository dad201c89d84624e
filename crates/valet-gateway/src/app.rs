use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use valet_agent::{AnthropicClient, MessagesApi, Orchestrator, ToolRegistry};
use valet_alerts::AlertStore;
use valet_core::config::ValetConfig;
use valet_memory::{EmbeddingClient, FactStore, HistoryStore};
use valet_notify::Notifier;
use valet_scheduler::TaskStore;
use valet_store::Store;
use valet_users::{OAuthTokenStore, UserStore};

use crate::events::EventStore;
use crate::http;

/// Everything the HTTP handlers and background workers share. Stores are
/// cheap handles over the one database; tools and the LLM client are
/// constructed once here and live for the process.
pub struct AppState {
    pub config: ValetConfig,
    pub store: Store,
    pub users: UserStore,
    pub oauth_tokens: OAuthTokenStore,
    pub facts: FactStore,
    pub history: HistoryStore,
    pub tasks: TaskStore,
    pub alerts: AlertStore,
    pub events: EventStore,
    pub registry: ToolRegistry,
    pub notifier: Option<Arc<Notifier>>,
    pub llm: Arc<dyn MessagesApi>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: ValetConfig, store: Store) -> anyhow::Result<Self> {
        // Subsystem constructors create their own tables; users first so
        // implicit user upserts always have a target.
        let users = UserStore::new(store.clone())?;
        let oauth_tokens = OAuthTokenStore::new(store.clone())?;
        let embedder = config
            .embeddings
            .as_ref()
            .map(|e| EmbeddingClient::new(e.url.clone(), e.model.clone()));
        let facts = FactStore::new(store.clone(), users.clone(), embedder)?;
        let history = HistoryStore::new(store.clone())?;
        let tasks = TaskStore::new(store.clone())?;
        let alerts = AlertStore::new(store.clone())?;
        let events = EventStore::new(store.clone())?;
        store.with(valet_agent::audit::init_db)?;

        let notifier = config
            .notify
            .as_ref()
            .map(|n| Arc::new(Notifier::new(n, users.clone())));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(valet_agent::tools::memory::RememberFactTool::new(
            facts.clone(),
        )));
        registry.register(Arc::new(valet_agent::tools::memory::RecallFactsTool::new(
            facts.clone(),
        )));
        registry.register(Arc::new(valet_agent::tools::memory::GetUserTool::new(
            users.clone(),
        )));
        registry.register(Arc::new(
            valet_agent::tools::memory::GetConversationsTool::new(history.clone()),
        ));
        registry.register(Arc::new(valet_agent::tools::memory::UpdateSoulTool::new(
            users.clone(),
        )));
        registry.register(Arc::new(valet_agent::tools::schedule::ScheduleTaskTool::new(
            tasks.clone(),
        )));
        registry.register(Arc::new(
            valet_agent::tools::notify::SendNotificationTool::new(notifier.clone()),
        ));
        registry.register(Arc::new(valet_agent::tools::health::ServerHealthTool::new(
            config.health_probes.clone(),
        )));

        let llm: Arc<dyn MessagesApi> = Arc::new(AnthropicClient::new(
            config.llm.api_key.clone(),
            config.llm.base_url.clone(),
        ));
        let web_search = config
            .llm
            .web_search_enabled
            .then_some(config.llm.web_search_max_uses);
        let orchestrator = Arc::new(Orchestrator::new(
            llm.clone(),
            config.llm.model.clone(),
            config.llm.max_tokens,
            config.llm.max_tool_rounds,
            web_search,
        ));

        Ok(Self {
            config,
            store,
            users,
            oauth_tokens,
            facts,
            history,
            tasks,
            alerts,
            events,
            registry,
            notifier,
            llm,
            orchestrator,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/api/chat", post(http::chat::chat_handler))
        .route("/api/chat/stream", post(http::chat::chat_stream_handler))
        .route(
            "/api/chat/history",
            get(http::chat::history_handler).delete(http::chat::clear_history_handler),
        )
        .route(
            "/api/webhooks/homeassistant",
            post(http::webhooks::webhook_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
