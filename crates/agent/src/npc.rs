//! NPC agent — a persona with a chat history, optional knowledge and tools.

use grimoire_config::{AgentProfile, ModelsConfig};
use grimoire_core::error::{Error, ProviderError, ToolError};
use grimoire_core::event::EventBus;
use grimoire_core::knowledge::KnowledgeSource;
use grimoire_core::message::{ConversationHistory, Message, ToolRequest};
use grimoire_core::provider::{CompletionRequest, Provider, ResponseFormat};
use grimoire_core::tool::ToolCatalog;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::confirmation::ConfirmationChannel;
use crate::loop_runner::{ToolCallsResult, ToolLoop, ToolLoopError};
use crate::policy::{Automatic, Confirmed, ExecutionPolicy};

const CONTEXT_PREFIX: &str = "Relevant context to help you answer the next question:\n";

/// A non-player character backed by a language model.
///
/// Chat turns accumulate in [`history`](Self::history). Tool runs use a
/// fresh history each time; the last one is kept in
/// [`tool_history`](Self::tool_history).
pub struct NpcAgent {
    profile: AgentProfile,
    provider: Arc<dyn Provider>,
    chat_model: String,
    tools_model: String,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
    event_bus: Option<Arc<EventBus>>,
    messages: ConversationHistory,
    tool_history: ConversationHistory,
}

impl NpcAgent {
    pub fn new(profile: AgentProfile, provider: Arc<dyn Provider>, models: &ModelsConfig) -> Self {
        Self {
            profile,
            provider,
            chat_model: models.chat.clone(),
            tools_model: models.tools.clone(),
            knowledge: None,
            event_bus: None,
            messages: ConversationHistory::new(),
            tool_history: ConversationHistory::new(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn set_system_instructions(&mut self, instructions: impl Into<String>) {
        self.profile.system_instructions = instructions.into();
    }

    pub fn set_tools_system_instructions(&mut self, instructions: impl Into<String>) {
        self.profile.tools_system_instructions = instructions.into();
    }

    /// Replace the chat instructions with the contents of a file.
    pub async fn set_system_instructions_from_file(&mut self, path: &Path) -> Result<(), Error> {
        let instructions = read_instructions(path).await?;
        debug!(agent = %self.profile.name, path = %path.display(), "Loaded chat instructions");
        self.set_system_instructions(instructions);
        Ok(())
    }

    /// Replace the tool-run instructions with the contents of a file.
    pub async fn set_tools_system_instructions_from_file(
        &mut self,
        path: &Path,
    ) -> Result<(), Error> {
        let instructions = read_instructions(path).await?;
        debug!(agent = %self.profile.name, path = %path.display(), "Loaded tool instructions");
        self.set_tools_system_instructions(instructions);
        Ok(())
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.messages
    }

    pub fn tool_history(&self) -> &ConversationHistory {
        &self.tool_history
    }

    pub fn transcript(&self) -> String {
        self.messages.transcript()
    }

    pub fn reset_messages(&mut self) {
        debug!(agent = %self.profile.name, "Resetting chat history");
        self.messages.reset();
    }

    fn chat_request(&self, user_message: &str) -> CompletionRequest {
        let mut messages = self.messages.messages().to_vec();
        messages.push(Message::user(user_message));

        let mut request = CompletionRequest::new(&self.chat_model, messages);
        request.system = Some(self.profile.system_instructions.clone());
        request.temperature = self.profile.temperature;
        request.top_p = Some(self.profile.top_p);
        request
    }

    fn remember(&mut self, user_message: &str, answer: &str) {
        self.messages.push(Message::user(user_message.trim()));
        self.messages.push(Message::assistant(answer.trim()));
    }

    /// One chat turn. History only grows when the provider succeeds.
    pub async fn completion(&mut self, user_message: &str) -> Result<String, Error> {
        let request = self.chat_request(user_message);
        let response = self.provider.complete(request).await?;
        let answer = response.message.text();
        self.remember(user_message, &answer);
        Ok(answer)
    }

    /// One chat turn whose answer must match `schema`. Returns the parsed
    /// answer; history only grows when it is valid JSON.
    pub async fn json_completion(
        &mut self,
        user_message: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let mut request = self.chat_request(user_message);
        request.response_format = Some(ResponseFormat::json_schema(schema_name, schema));

        let response = self.provider.complete(request).await?;
        let answer = response.message.text();
        let value: serde_json::Value = serde_json::from_str(answer.trim()).map_err(|e| {
            ProviderError::MalformedOutput(format!("answer is not JSON: {e}"))
        })?;
        self.remember(user_message, &answer);
        Ok(value)
    }

    /// Like [`completion`](Self::completion), handing each chunk to
    /// `on_chunk` as it arrives.
    pub async fn stream_completion<F>(
        &mut self,
        user_message: &str,
        mut on_chunk: F,
    ) -> Result<String, Error>
    where
        F: FnMut(&str) + Send,
    {
        let request = self.chat_request(user_message);
        let mut rx = self.provider.stream(request).await?;

        let mut answer = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content.as_deref().filter(|c| !c.is_empty()) {
                on_chunk(content);
                answer.push_str(content);
            }
            if chunk.done {
                break;
            }
        }

        self.remember(user_message, &answer);
        Ok(answer)
    }

    /// Look up knowledge for `user_message` and add it to the chat history
    /// as a system message. Returns the context found (possibly empty).
    pub async fn similarity_search(&mut self, user_message: &str) -> Result<String, Error> {
        let Some(knowledge) = &self.knowledge else {
            return Ok(String::new());
        };

        let context = knowledge.relevant_context(user_message).await?;
        if context.is_empty() {
            debug!(agent = %self.profile.name, "No relevant context found");
            return Ok(context);
        }

        debug!(agent = %self.profile.name, chars = context.len(), "Adding relevant context");
        self.messages
            .push(Message::system(format!("{CONTEXT_PREFIX}{context}")));
        Ok(context)
    }

    async fn gather_context(&mut self, user_message: &str) {
        if let Err(e) = self.similarity_search(user_message).await {
            warn!(agent = %self.profile.name, error = %e, "Knowledge lookup failed, answering without it");
        }
    }

    pub async fn completion_with_similarity_search(
        &mut self,
        user_message: &str,
    ) -> Result<String, Error> {
        self.gather_context(user_message).await;
        self.completion(user_message).await
    }

    pub async fn stream_completion_with_similarity_search<F>(
        &mut self,
        user_message: &str,
        on_chunk: F,
    ) -> Result<String, Error>
    where
        F: FnMut(&str) + Send,
    {
        self.gather_context(user_message).await;
        self.stream_completion(user_message, on_chunk).await
    }

    fn tool_loop(&self) -> ToolLoop {
        let mut tool_loop = ToolLoop::new(Arc::clone(&self.provider), &self.tools_model)
            .with_system_instructions(&self.profile.tools_system_instructions)
            .with_temperature(self.profile.temperature)
            .with_top_p(self.profile.top_p)
            .with_max_rounds(self.profile.max_rounds);
        if let Some(bus) = &self.event_bus {
            tool_loop = tool_loop.with_event_bus(Arc::clone(bus));
        }
        tool_loop
    }

    /// Run the tool loop under any execution policy.
    pub async fn run_tools(
        &mut self,
        user_message: &str,
        catalog: &ToolCatalog,
        policy: &dyn ExecutionPolicy,
    ) -> Result<ToolCallsResult, ToolLoopError> {
        info!(agent = %self.profile.name, "Detecting tool calls");
        let mut history = ConversationHistory::new();
        let outcome = self
            .tool_loop()
            .run(&mut history, user_message, catalog, policy)
            .await;
        self.tool_history = history;
        outcome
    }

    /// Run the tool loop, executing every resolved request.
    pub async fn detect_and_execute_tool_calls(
        &mut self,
        user_message: &str,
        catalog: &ToolCatalog,
    ) -> Result<ToolCallsResult, ToolLoopError> {
        self.run_tools(user_message, catalog, &Automatic).await
    }

    /// Run the tool loop, asking `channel` before each invocation.
    pub async fn detect_and_execute_tool_calls_with_confirmation(
        &mut self,
        user_message: &str,
        catalog: &ToolCatalog,
        channel: Arc<dyn ConfirmationChannel>,
    ) -> Result<ToolCallsResult, ToolLoopError> {
        let policy = Confirmed::new(channel);
        self.run_tools(user_message, catalog, &policy).await
    }

    /// Invoke one tool directly, without the model.
    pub async fn direct_execute_tool(
        &self,
        catalog: &ToolCatalog,
        request: &ToolRequest,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = catalog
            .resolve(&request.name)
            .ok_or_else(|| ToolError::NotFound(request.name.clone()))?;
        debug!(agent = %self.profile.name, tool = %request.name, "Direct tool execution");
        tool.invoke(request.input.clone()).await
    }
}

async fn read_instructions(path: &Path) -> Result<String, Error> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config {
            message: format!("cannot read instructions from {}: {e}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::{Decision, ScriptedConfirmation};
    use crate::loop_runner::{Outcome, Termination};
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use grimoire_core::error::{MemoryError, ProviderError};
    use grimoire_core::message::Role;
    use grimoire_tools::{RollDiceTool, default_catalog};

    struct FixedKnowledge(&'static str);

    #[async_trait]
    impl KnowledgeSource for FixedKnowledge {
        async fn relevant_context(&self, _query: &str) -> Result<String, MemoryError> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenKnowledge;

    #[async_trait]
    impl KnowledgeSource for BrokenKnowledge {
        async fn relevant_context(&self, _query: &str) -> Result<String, MemoryError> {
            Err(MemoryError::QueryFailed("index offline".into()))
        }
    }

    fn agent(provider: Arc<SequentialMockProvider>) -> NpcAgent {
        NpcAgent::new(AgentProfile::default(), provider, &ModelsConfig::default())
    }

    #[tokio::test]
    async fn completion_appends_turn() {
        let provider = Arc::new(SequentialMockProvider::single_text("  Greetings, traveller.  "));
        let mut elara = agent(provider.clone());

        let answer = elara.completion("Who are you?").await.unwrap();
        assert_eq!(answer, "  Greetings, traveller.  ");
        assert_eq!(elara.history().len(), 2);
        assert_eq!(elara.history().messages()[1].text(), "Greetings, traveller.");

        let request = &provider.requests()[0];
        assert_eq!(request.model, ModelsConfig::default().chat);
        assert!(request.system.as_deref().unwrap().contains("Elara"));
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn failed_completion_leaves_history_alone() {
        let provider = Arc::new(SequentialMockProvider::new(vec![Err(
            ProviderError::Timeout("slow model".into()),
        )]));
        let mut elara = agent(provider);

        let err = elara.completion("Hello?").await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Timeout(_))));
        assert!(elara.history().is_empty());
    }

    #[tokio::test]
    async fn history_is_sent_on_next_turn() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_text_response("I am Elara.")),
            Ok(make_text_response("From Silverymoon.")),
        ]));
        let mut elara = agent(provider.clone());

        elara.completion("Name?").await.unwrap();
        elara.completion("Home?").await.unwrap();
        assert_eq!(provider.requests()[1].messages.len(), 3);

        elara.reset_messages();
        assert!(elara.history().is_empty());
    }

    #[tokio::test]
    async fn json_completion_requests_schema_and_parses_answer() {
        let provider = Arc::new(SequentialMockProvider::single_text(
            r#" {"name": "Thorin", "race": "dwarf"} "#,
        ));
        let mut elara = agent(provider.clone());
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "race": {"type": "string"}},
            "required": ["name", "race"]
        });

        let value = elara
            .json_completion("Invent a dwarf", "character", schema.clone())
            .await
            .unwrap();
        assert_eq!(value["name"], "Thorin");
        assert_eq!(elara.history().len(), 2);

        let format = provider.requests()[0].response_format.clone().unwrap();
        assert_eq!(format.name, "character");
        assert_eq!(format.schema, schema);
    }

    #[tokio::test]
    async fn json_completion_rejects_prose() {
        let provider = Arc::new(SequentialMockProvider::single_text("Thorin, a dwarf."));
        let mut elara = agent(provider);

        let err = elara
            .json_completion("Invent a dwarf", "character", serde_json::json!({"type": "object"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::MalformedOutput(_))));
        assert!(elara.history().is_empty());
    }

    #[tokio::test]
    async fn instructions_load_from_files() {
        use std::io::Write;

        let provider = Arc::new(SequentialMockProvider::single_text("Aye."));
        let mut elara = agent(provider.clone());

        let mut chat = tempfile::NamedTempFile::new().unwrap();
        write!(chat, "You are Borin, a gruff blacksmith.").unwrap();
        let mut tools = tempfile::NamedTempFile::new().unwrap();
        write!(tools, "Only roll dice when asked.").unwrap();

        elara.set_system_instructions_from_file(chat.path()).await.unwrap();
        elara
            .set_tools_system_instructions_from_file(tools.path())
            .await
            .unwrap();
        assert_eq!(elara.profile().tools_system_instructions, "Only roll dice when asked.");

        elara.completion("Hello").await.unwrap();
        assert_eq!(
            provider.requests()[0].system.as_deref(),
            Some("You are Borin, a gruff blacksmith.")
        );

        let missing = elara
            .set_system_instructions_from_file(Path::new("/nonexistent/borin.md"))
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::Config { .. }));
        assert_eq!(
            elara.profile().system_instructions,
            "You are Borin, a gruff blacksmith."
        );
    }

    #[tokio::test]
    async fn stream_completion_delivers_chunks() {
        let provider = Arc::new(SequentialMockProvider::single_text("Well met."));
        let mut elara = agent(provider);

        let mut seen = Vec::new();
        let answer = elara
            .stream_completion("Hi", |chunk| seen.push(chunk.to_string()))
            .await
            .unwrap();

        assert_eq!(answer, "Well met.");
        assert_eq!(seen, vec!["Well met."]);
        assert_eq!(elara.history().len(), 2);
    }

    #[tokio::test]
    async fn similarity_search_adds_system_message() {
        let provider = Arc::new(SequentialMockProvider::single_text("The Moonwell lies north."));
        let mut elara = agent(provider.clone())
            .with_knowledge(Arc::new(FixedKnowledge("The Moonwell is north of the village.")));

        let answer = elara
            .completion_with_similarity_search("Where is the Moonwell?")
            .await
            .unwrap();
        assert_eq!(answer, "The Moonwell lies north.");

        let messages = elara.history().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[0].text(),
            "Relevant context to help you answer the next question:\nThe Moonwell is north of the village."
        );
        assert_eq!(provider.requests()[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn similarity_search_without_knowledge_is_empty() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let mut elara = agent(provider);
        assert_eq!(elara.similarity_search("anything").await.unwrap(), "");
        assert!(elara.history().is_empty());
    }

    #[tokio::test]
    async fn knowledge_failure_does_not_block_chat() {
        let provider = Arc::new(SequentialMockProvider::single_text("Hmm."));
        let mut elara = agent(provider).with_knowledge(Arc::new(BrokenKnowledge));

        assert!(elara.similarity_search("x").await.is_err());
        let answer = elara.completion_with_similarity_search("x").await.unwrap();
        assert_eq!(answer, "Hmm.");
        assert_eq!(elara.history().len(), 2);
    }

    #[tokio::test]
    async fn tool_runs_use_fresh_history() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_tool_call_response(vec![tool_request(
                "roll_dice",
                "call_1",
                serde_json::json!({"num_dice": 2, "num_faces": 6}),
            )])),
            Ok(make_text_response("Rolled.")),
            Ok(make_text_response("Nothing to do.")),
        ]));
        let mut elara = agent(provider.clone());
        let catalog = default_catalog();

        let first = elara
            .detect_and_execute_tool_calls("Roll 2d6", &catalog)
            .await
            .unwrap();
        assert_eq!(first.total_calls, 1);
        assert_eq!(elara.tool_history().len(), 3);

        let second = elara
            .detect_and_execute_tool_calls("Just chat", &catalog)
            .await
            .unwrap();
        assert_eq!(second.total_calls, 0);
        assert_eq!(second.final_message, "Nothing to do.");
        assert_eq!(elara.tool_history().len(), 1);

        // chat history untouched by tool runs
        assert!(elara.history().is_empty());

        let request = &provider.requests()[2];
        assert_eq!(request.model, ModelsConfig::default().tools);
        assert_eq!(request.messages.len(), 1);
        assert!(request.system.as_deref().unwrap().contains("roll dice"));
    }

    #[tokio::test]
    async fn attached_event_bus_sees_tool_runs() {
        use grimoire_core::event::DomainEvent;

        let provider = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_tool_call_response(vec![tool_request(
                "roll_dice",
                "call_1",
                serde_json::json!({"num_dice": 1, "num_faces": 4}),
            )])),
            Ok(make_text_response("Rolled a d4.")),
        ]));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let mut elara = agent(provider).with_event_bus(bus);

        elara
            .detect_and_execute_tool_calls("Roll a d4", &default_catalog())
            .await
            .unwrap();

        let mut executed = 0;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                DomainEvent::ToolExecuted { tool_name, .. } => {
                    assert_eq!(tool_name, "roll_dice");
                    executed += 1;
                }
                DomainEvent::LoopFinished { .. } => finished = true,
                _ => {}
            }
        }
        assert_eq!(executed, 1);
        assert!(finished);
    }

    #[tokio::test]
    async fn confirmation_variant_asks_channel() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_tool_call_response(vec![tool_request(
                "generate_character_name",
                "call_1",
                serde_json::json!({"race": "orc"}),
            )])),
            Ok(make_text_response("Fine, no name.")),
        ]));
        let mut elara = agent(provider);
        let channel = Arc::new(ScriptedConfirmation::new([Decision::Deny]));

        let result = elara
            .detect_and_execute_tool_calls_with_confirmation(
                "Name an orc",
                &default_catalog(),
                channel.clone(),
            )
            .await
            .unwrap();

        assert_eq!(result.termination, Termination::Answered);
        assert!(matches!(result.records[0].outcome, Outcome::Cancelled(_)));
        assert_eq!(channel.asked(), vec!["generate_character_name"]);
    }

    #[tokio::test]
    async fn direct_execution_skips_the_model() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let elara = agent(provider.clone());
        let catalog = ToolCatalog::new().with(Arc::new(RollDiceTool::with_seed(7)));

        let out = elara
            .direct_execute_tool(
                &catalog,
                &tool_request("roll_dice", "direct", serde_json::json!({"num_dice": 4, "num_faces": 6})),
            )
            .await
            .unwrap();
        assert_eq!(out["rolls"].as_array().unwrap().len(), 4);
        assert_eq!(provider.call_count(), 0);

        let missing = elara
            .direct_execute_tool(&catalog, &tool_request("fireball", "direct", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(missing, ToolError::NotFound(_)));
    }
}
