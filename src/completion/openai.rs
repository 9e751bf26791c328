//! OpenAI structured-output adapter
//!
//! Implements [`SchematicCompletion`](super::SchematicCompletion) over
//! OpenAI-compatible chat completions in JSON mode. The requested schema is
//! rendered into the system framing; typed validation happens upstream in
//! the generator.

use crate::completion::{CompletionRequest, SchematicCompletion};
use crate::error::{CompletionError, CompletionResult};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, trace, warn};

/// OpenAI-backed structured completion
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiCompletion {
    /// Create an adapter with the given API key and default model
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: "gpt-4o".to_string(),
            temperature: 0.3,
        }
    }

    /// Create an adapter from the `OPENAI_API_KEY` environment variable
    pub fn from_env() -> CompletionResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            CompletionError::Configuration("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    fn build_messages(&self, request: &CompletionRequest) -> Vec<ChatCompletionRequestMessage> {
        let system = format!(
            "{}\n\nRespond with a single JSON object satisfying this schema:\n{}",
            request.system, request.schema
        );
        let mut user = request.prompt.clone();
        if let Some(hint) = &request.hint {
            user.push_str("\n\n");
            user.push_str(hint);
        }

        vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(system),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(user),
                name: None,
            }),
        ]
    }
}

#[async_trait]
impl SchematicCompletion for OpenAiCompletion {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<serde_json::Value> {
        trace!(
            model = %self.model,
            stage = %request.stage,
            "requesting OpenAI structured completion"
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.build_messages(request))
            .temperature(self.temperature)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| CompletionError::Request(format!("failed to build request: {e}")))?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!(error = %e, "OpenAI API error");
            CompletionError::Request(format!("OpenAI API error: {e}"))
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| CompletionError::InvalidOutput("no content in response".into()))?;

        debug!(
            stage = %request.stage,
            response_length = content.len(),
            "OpenAI completion received"
        );

        serde_json::from_str(&content)
            .map_err(|e| CompletionError::InvalidOutput(format!("response is not JSON: {e}")))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adapter_defaults() {
        let adapter = OpenAiCompletion::new("test-key");
        assert_eq!(adapter.name(), "openai");
        assert_eq!(adapter.model, "gpt-4o");
    }

    #[test]
    fn builder_overrides_model_and_clamps_temperature() {
        let adapter = OpenAiCompletion::new("test-key")
            .with_model("gpt-4o-mini")
            .with_temperature(5.0);
        assert_eq!(adapter.model, "gpt-4o-mini");
        assert_eq!(adapter.temperature, 2.0);
    }

    #[test]
    fn messages_carry_schema_and_hint() {
        let adapter = OpenAiCompletion::new("test-key");
        let mut request = CompletionRequest::new(
            "propose",
            "You evaluate guidelines",
            "Evaluate these",
            json!({"type": "object"}),
        );
        request.hint = Some("Your previous output was invalid JSON".into());

        let messages = adapter.build_messages(&request);
        assert_eq!(messages.len(), 2);

        let ChatCompletionRequestMessage::System(system) = &messages[0] else {
            panic!("first message must be the system framing");
        };
        let ChatCompletionRequestSystemMessageContent::Text(system_text) = &system.content else {
            panic!("system content must be text");
        };
        assert!(system_text.contains("schema"));

        let ChatCompletionRequestMessage::User(user) = &messages[1] else {
            panic!("second message must be the user prompt");
        };
        let ChatCompletionRequestUserMessageContent::Text(user_text) = &user.content else {
            panic!("user content must be text");
        };
        assert!(user_text.contains("invalid JSON"));
    }
}
