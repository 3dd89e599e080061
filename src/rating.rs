use crate::config::JudgeConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// Transport-level failures talking to the rating model
#[derive(Debug, Error)]
pub enum RatingError {
    #[error("environment variable {0} not found")]
    MissingApiKey(String),
    #[error("rating request failed: {0}")]
    Api(#[from] OpenAIError),
    #[error("rating request failed: {0}")]
    Transport(String),
}

/// A model that rates answers given a system and a user prompt
#[async_trait]
pub trait RatingClient: Send + Sync {
    /// Send the prompts and return the model's raw text reply
    async fn rate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, RatingError>;

    /// Model name, for run headers
    fn model(&self) -> &str;
}

/// Rating client for OpenAI-compatible chat completion endpoints
pub struct OpenAiRatingClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u16,
    rate_limit_rps: f64,
    request_timeout: Duration,
    /// Time of the last request, shared by all callers of this client
    last_request: Mutex<Option<Instant>>,
}

impl OpenAiRatingClient {
    /// Create a client reading the API key from the configured environment variable
    pub fn from_env(config: &JudgeConfig) -> Result<Self, RatingError> {
        let api_key = std::env::var(&config.env_var_api_key)
            .map_err(|_| RatingError::MissingApiKey(config.env_var_api_key.clone()))?;

        Ok(Self::with_api_key(config, api_key))
    }

    pub fn with_api_key(config: &JudgeConfig, api_key: impl Into<String>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.into())
            .with_api_base(&config.api_endpoint);

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature as f32,
            max_tokens: config.max_tokens,
            rate_limit_rps: config.rate_limit_rps,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            last_request: Mutex::new(None),
        }
    }

    /// Enforce rate limiting for judge requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps.is_nan() || rate_limit_rps <= 0.0 {
            return;
        }

        let Ok(min_interval) = Duration::try_from_secs_f64(1.0 / rate_limit_rps) else {
            return;
        };

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Build the chat completion request for the judge
    fn build_request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let system_message: ChatCompletionRequestMessage =
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt.to_string())
                .build()?
                .into();

        let user_message: ChatCompletionRequestMessage =
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt.to_string())
                .build()?
                .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
    }

    /// Text of the first choice; empty when the model returned nothing
    fn extract_content(response: CreateChatCompletionResponse) -> String {
        match response.choices.into_iter().next() {
            Some(choice) => choice.message.content.unwrap_or_default(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl RatingClient for OpenAiRatingClient {
    async fn rate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, RatingError> {
        {
            let mut last_request = self.last_request.lock().await;
            Self::enforce_rate_limit(&mut last_request, self.rate_limit_rps).await;
        }

        let request = self.build_request(system_prompt, user_prompt)?;
        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                RatingError::Transport(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs()
                ))
            })??;

        if let Some(usage) = &response.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "judge response received"
            );
        }

        Ok(Self::extract_content(response))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
