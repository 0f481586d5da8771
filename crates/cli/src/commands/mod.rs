//! Subcommands and the setup they share.

pub mod catalog;
pub mod chat;
pub mod init;
pub mod tools;

use grimoire_agent::NpcAgent;
use grimoire_config::{AppConfig, ConfigError};
use grimoire_core::event::EventBus;
use grimoire_core::provider::Provider;
use grimoire_core::tool::ToolCatalog;
use grimoire_memory::EmbeddingKnowledgeBase;
use grimoire_providers::OpenAiCompatProvider;
use grimoire_tools::{CharacterNameTool, RemoteToolClient, RollDiceTool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load_with_env(&config_path(explicit))
}

pub fn provider(config: &AppConfig) -> Arc<dyn Provider> {
    Arc::new(OpenAiCompatProvider::from_config(&config.engine))
}

/// An event bus whose events are logged at debug level as they arrive.
pub fn event_logger() -> Arc<EventBus> {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        // Ends once the bus is dropped
        while let Ok(event) = rx.recv().await {
            debug!(?event, "Domain event");
        }
    });
    bus
}

/// Local game tools, plus remote ones when a server is given or enabled,
/// plus `list_tools` describing all of them.
pub async fn build_catalog(config: &AppConfig, remote: Option<&str>) -> CmdResult<ToolCatalog> {
    let mut catalog = ToolCatalog::new()
        .with(Arc::new(RollDiceTool::new()))
        .with(Arc::new(CharacterNameTool::new()));

    let endpoint = remote.map(str::to_string).or_else(|| {
        config
            .remote_tools
            .enabled
            .then(|| config.remote_tools.base_url.clone())
    });
    if let Some(endpoint) = endpoint {
        let client = RemoteToolClient::connect(endpoint.as_str())
            .await
            .map_err(|e| format!("Failed to connect to remote tools at {endpoint}: {e}"))?;
        catalog.extend(client.catalog().await?);
    }

    Ok(grimoire_tools::with_listing(catalog))
}

/// An NPC for the chosen profile. With `index_knowledge`, the profile's
/// knowledge file (if any) is embedded and attached.
pub async fn build_agent(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    agent: Option<&str>,
    index_knowledge: bool,
) -> CmdResult<NpcAgent> {
    let profile = config.agent_profile(agent)?;
    let knowledge_path = profile.knowledge_path.clone().filter(|_| index_knowledge);
    let mut npc = NpcAgent::new(profile, Arc::clone(&provider), &config.models);

    if let Some(path) = knowledge_path {
        let knowledge = EmbeddingKnowledgeBase::new(provider, &config.models.embeddings)
            .with_limits(config.similarity.limit, config.similarity.max_results);
        let chunks = knowledge.index_markdown_file(&path).await?;
        info!(agent = %npc.name(), chunks, path = %path.display(), "Knowledge indexed");
        npc = npc.with_knowledge(Arc::new(knowledge));
    }

    Ok(npc)
}
