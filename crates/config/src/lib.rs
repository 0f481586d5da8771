//! Configuration loading, validation, and management for Grimoire.
//!
//! Loads configuration from `~/.grimoire/config.toml`, then applies
//! environment variable overrides. Validates all settings at startup.
//! Each NPC is described by an explicit [`AgentProfile`]; nothing about an
//! agent lives in process-wide state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.grimoire/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model engine endpoint
    #[serde(default)]
    pub engine: EngineConfig,

    /// Which model serves which job
    #[serde(default)]
    pub models: ModelsConfig,

    /// Knowledge retrieval thresholds
    #[serde(default)]
    pub similarity: SimilarityConfig,

    /// Remote tool server
    #[serde(default)]
    pub remote_tools: RemoteToolsConfig,

    /// NPC profiles
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// OpenAI-compatible base URL (Docker Model Runner by default)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:12434/engines/v1/".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model for plain conversation
    #[serde(default = "default_chat_model")]
    pub chat: String,

    /// Model for tool-call detection
    #[serde(default = "default_tools_model")]
    pub tools: String,

    /// Model for knowledge embeddings
    #[serde(default = "default_embeddings_model")]
    pub embeddings: String,
}

fn default_chat_model() -> String {
    "ai/qwen2.5:1.5B-F16".into()
}
fn default_tools_model() -> String {
    "hf.co/menlo/jan-nano-gguf:q4_k_m".into()
}
fn default_embeddings_model() -> String {
    "ai/mxbai-embed-large".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_model(),
            tools: default_tools_model(),
            embeddings: default_embeddings_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Minimum cosine similarity for a chunk to count as relevant
    #[serde(default = "default_similarity_limit")]
    pub limit: f64,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_similarity_limit() -> f64 {
    0.5
}
fn default_max_results() -> usize {
    2
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            limit: default_similarity_limit(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolsConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    /// Merge the remote catalog into every tool run
    #[serde(default)]
    pub enabled: bool,
}

fn default_remote_base_url() -> String {
    "http://localhost:9011".into()
}

impl Default for RemoteToolsConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            enabled: false,
        }
    }
}

/// Everything that distinguishes one NPC from another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,

    /// Persona used for conversation
    #[serde(default = "default_system_instructions")]
    pub system_instructions: String,

    /// Instructions used while detecting tool calls
    #[serde(default = "default_tools_system_instructions")]
    pub tools_system_instructions: String,

    /// Markdown file to index as background knowledge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_path: Option<PathBuf>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Upper bound on tool-call rounds per run (0 = unbounded)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Ask the operator before every tool invocation
    #[serde(default)]
    pub confirm_tools: bool,
}

fn default_agent_name() -> String {
    "Elara".into()
}
fn default_system_instructions() -> String {
    "You are Elara, a wise elven sorceress in a Dungeons & Dragons adventure. \
     Stay in character and answer briefly."
        .into()
}
fn default_tools_system_instructions() -> String {
    "You are a helpful D&D assistant that can roll dice and generate character names. \
     Use the appropriate tools when asked to roll dice or generate character names."
        .into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_rounds() -> u32 {
    25
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_instructions: default_system_instructions(),
            tools_system_instructions: default_tools_system_instructions(),
            knowledge_path: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_rounds: default_max_rounds(),
            confirm_tools: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.grimoire/config.toml)
    /// and apply environment overrides:
    /// - `MODEL_RUNNER_BASE_URL`, `GRIMOIRE_API_KEY`
    /// - `CHAT_MODEL`, `TOOLS_MODEL`, `EMBEDDING_MODEL`
    /// - `SIMILARITY_LIMIT`, `SIMILARITY_MAX_RESULTS`
    /// - `MCP_SERVER_BASE_URL` (also enables remote tools)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// [`load_from`](Self::load_from) followed by process environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MODEL_RUNNER_BASE_URL") {
            self.engine.base_url = url;
        }
        if let Some(key) = lookup("GRIMOIRE_API_KEY") {
            self.engine.api_key = Some(key);
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            self.models.chat = model;
        }
        if let Some(model) = lookup("TOOLS_MODEL") {
            self.models.tools = model;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.models.embeddings = model;
        }
        if let Some(raw) = lookup("SIMILARITY_LIMIT") {
            self.similarity.limit = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("SIMILARITY_LIMIT is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("SIMILARITY_MAX_RESULTS") {
            self.similarity.max_results = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "SIMILARITY_MAX_RESULTS is not a count: {raw}"
                ))
            })?;
        }
        if let Some(url) = lookup("MCP_SERVER_BASE_URL") {
            self.remote_tools.base_url = url;
            self.remote_tools.enabled = true;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".grimoire")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.base_url must not be empty".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.similarity.limit) {
            return Err(ConfigError::ValidationError(
                "similarity.limit must be between 0.0 and 1.0".into(),
            ));
        }

        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "agent name must not be empty".into(),
                ));
            }
            if agent.temperature < 0.0 || agent.temperature > 2.0 {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}': temperature must be between 0.0 and 2.0",
                    agent.name
                )));
            }
            if agent.top_p <= 0.0 || agent.top_p > 1.0 {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}': top_p must be in (0.0, 1.0]",
                    agent.name
                )));
            }
        }

        Ok(())
    }

    /// Pick an agent profile.
    ///
    /// `None` selects the first configured agent, or the built-in default
    /// when none are configured. A named agent must exist.
    pub fn agent_profile(&self, name: Option<&str>) -> Result<AgentProfile, ConfigError> {
        match name {
            Some(name) => self
                .agents
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(name))
                .cloned()
                .ok_or_else(|| ConfigError::UnknownAgent(name.to_string())),
            None => Ok(self.agents.first().cloned().unwrap_or_default()),
        }
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self {
            agents: vec![AgentProfile::default()],
            ..Self::default()
        };
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("No agent named '{0}' in configuration")]
    UnknownAgent(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.base_url, "http://localhost:12434/engines/v1/");
        assert_eq!(config.models.chat, "ai/qwen2.5:1.5B-F16");
        assert_eq!(config.similarity.max_results, 2);
        assert!(!config.remote_tools.enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.models.tools, "hf.co/menlo/jan-nano-gguf:q4_k_m");
        assert_eq!(parsed.agents.len(), 1);
        assert_eq!(parsed.agents[0].max_rounds, 25);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.similarity.limit, 0.5);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn load_agents_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[engine]
base_url = "http://localhost:11434/v1"

[[agents]]
name = "Bob"
system_instructions = "You are Bob, a grumpy dwarf blacksmith."
max_rounds = 5
confirm_tools = true

[[agents]]
name = "Sorcerer"
knowledge_path = "lore/sorcerer.md"
top_p = 0.5
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.engine.base_url, "http://localhost:11434/v1");
        assert_eq!(config.agents.len(), 2);

        let bob = config.agent_profile(Some("bob")).unwrap();
        assert_eq!(bob.max_rounds, 5);
        assert!(bob.confirm_tools);
        assert_eq!(bob.top_p, 0.9);

        let sorcerer = config.agent_profile(Some("Sorcerer")).unwrap();
        assert_eq!(sorcerer.knowledge_path, Some(PathBuf::from("lore/sorcerer.md")));
        assert!(sorcerer.tools_system_instructions.contains("roll dice"));

        assert_eq!(config.agent_profile(None).unwrap().name, "Bob");
    }

    #[test]
    fn unknown_agent_is_an_error() {
        let config = AppConfig::default();
        assert!(matches!(
            config.agent_profile(Some("Gandalf")),
            Err(ConfigError::UnknownAgent(_))
        ));
        assert_eq!(config.agent_profile(None).unwrap().name, "Elara");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[engine\nbase_url = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("MODEL_RUNNER_BASE_URL", "http://model-runner.docker.internal/engines/v1/"),
                ("TOOLS_MODEL", "ai/qwen3"),
                ("SIMILARITY_LIMIT", "0.7"),
                ("SIMILARITY_MAX_RESULTS", "4"),
                ("MCP_SERVER_BASE_URL", "http://mcp:9011"),
                ("GRIMOIRE_API_KEY", "sk-secret"),
            ]))
            .unwrap();

        assert_eq!(config.engine.base_url, "http://model-runner.docker.internal/engines/v1/");
        assert_eq!(config.models.tools, "ai/qwen3");
        assert_eq!(config.models.chat, "ai/qwen2.5:1.5B-F16");
        assert_eq!(config.similarity.limit, 0.7);
        assert_eq!(config.similarity.max_results, 4);
        assert_eq!(config.remote_tools.base_url, "http://mcp:9011");
        assert_eq!(config.engine.api_key.as_deref(), Some("sk-secret"));
    }

    #[test]
    fn remote_tools_enabled_only_by_server_url() {
        let mut config = AppConfig::default();
        assert!(!config.remote_tools.enabled);

        config.apply_env_overrides(env(&[("CHAT_MODEL", "ai/smollm2")])).unwrap();
        assert!(!config.remote_tools.enabled);

        config
            .apply_env_overrides(env(&[("MCP_SERVER_BASE_URL", "http://mcp:9011")]))
            .unwrap();
        assert!(config.remote_tools.enabled);
        assert_eq!(config.remote_tools.base_url, "http://mcp:9011");
    }

    #[test]
    fn bad_env_number_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env(&[("SIMILARITY_MAX_RESULTS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SIMILARITY_MAX_RESULTS"));
    }

    #[test]
    fn out_of_range_similarity_rejected() {
        let mut config = AppConfig::default();
        assert!(
            config
                .apply_env_overrides(env(&[("SIMILARITY_LIMIT", "1.5")]))
                .is_err()
        );
    }

    #[test]
    fn invalid_agent_temperature_rejected() {
        let config = AppConfig {
            agents: vec![AgentProfile {
                temperature: 5.0,
                ..AgentProfile::default()
            }],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.engine.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
