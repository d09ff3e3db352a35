//! Reply generation through OpenAI-compatible chat-completion APIs.
//!
//! ZenMux, OpenRouter, OpenAI and Groq all speak the same protocol, so one
//! client type covers them. [`ReplyChain`] tries them in the configured order
//! and returns the first non-empty answer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::ServiceError;
use crate::config::{Config, LlmProvider};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
/// Used after the primary ZenMux model when no fallbacks are configured.
pub const ZENMUX_DEFAULT_FALLBACK: &str = "google/gemini-3-pro-preview";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 300;

/// A language model that answers a single prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider and model, for logs.
    fn label(&self) -> String;

    /// `Ok(None)` when the model answered with nothing usable.
    async fn complete(&self, prompt: &str) -> Result<Option<String>, ServiceError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [RequestMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    /// Some reasoning models leave `content` empty and answer here.
    reasoning: Option<String>,
}

/// Chat-completion endpoint speaking the OpenAI protocol.
pub struct OpenAiCompatible {
    name: String,
    url: String,
    api_key: String,
    model: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(name: &str, url: &str, api_key: &str, model: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            headers: Vec::new(),
            client,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
    fn label(&self) -> String {
        format!("{} ({})", self.name, self.model)
    }

    async fn complete(&self, prompt: &str) -> Result<Option<String>, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [RequestMessage { role: "user", content: prompt }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .json(&request);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout(self.label())
            } else {
                ServiceError::Http(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited { service: self.label() });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::status(&self.label(), status, &body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| {
                let content = m.content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
                content.or_else(|| m.reasoning.map(|r| r.trim().to_string()))
            })
            .filter(|r| !r.is_empty());

        Ok(reply)
    }
}

/// Persona text for a personality name. Unknown names are used verbatim, so
/// a custom persona can be written straight into the config.
pub fn persona_prompt(personality: &str) -> &str {
    match personality {
        "default" => {
            "You are a friendly bot in a group chat. Answer briefly, naturally and to the point.\n\
             Be a lively and interesting conversation partner."
        }
        "friendly" => {
            "You are a very friendly and sociable bot. Answer warmly and with enthusiasm.\n\
             Be positive and supportive."
        }
        "professional" => {
            "You are a professional and polite bot. Answer formally but kindly.\n\
             Keep a business tone, be precise and informative."
        }
        "funny" => {
            "You are a cheerful, witty bot with a sense of humour. Answer with jokes and irony.\n\
             Be funny without crossing the line."
        }
        custom => custom,
    }
}

pub fn build_prompt(persona: &str, group_context: Option<&str>, text: &str) -> String {
    let mut prompt = format!("{persona}\n\nContext: you were messaged in a group chat.\n");
    if let Some(context) = group_context {
        prompt.push_str(context.trim());
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Message: {text}\n\nReply to this message naturally, as in an ordinary conversation, \
         in the language of the message."
    ));
    prompt
}

/// ZenMux models to try: the primary model, then the configured fallbacks
/// (duplicates dropped), or the default fallback when none are configured.
pub fn zenmux_models(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut models = vec![primary.to_string()];
    if fallbacks.is_empty() {
        if primary != ZENMUX_DEFAULT_FALLBACK {
            models.push(ZENMUX_DEFAULT_FALLBACK.to_string());
        }
    } else {
        for model in fallbacks {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
    }
    models
}

/// Ordered fallback chain of chat models.
pub struct ReplyChain {
    models: Vec<Box<dyn ChatModel>>,
    personality: String,
    group_context: Option<String>,
}

impl ReplyChain {
    pub fn new(models: Vec<Box<dyn ChatModel>>, personality: &str, group_context: Option<String>) -> Self {
        Self {
            models,
            personality: personality.to_string(),
            group_context,
        }
    }

    /// Build the chain from every provider in `llm_order` that has a key.
    pub fn from_config(config: &Config) -> Self {
        let client = reqwest::Client::new();
        let mut models: Vec<Box<dyn ChatModel>> = Vec::new();

        for provider in &config.llm_order {
            let Some(key) = config.api_key(*provider) else {
                continue;
            };
            match provider {
                LlmProvider::ZenMux => {
                    let url = format!("{}/chat/completions", config.zenmux_base_url);
                    for model in zenmux_models(&config.zenmux_model, &config.fallback_models) {
                        models.push(Box::new(OpenAiCompatible::new("ZenMux", &url, key, &model, client.clone())));
                    }
                }
                LlmProvider::OpenRouter => models.push(Box::new(
                    OpenAiCompatible::new("OpenRouter", OPENROUTER_URL, key, &config.openrouter_model, client.clone())
                        .with_header("HTTP-Referer", "https://github.com/telegram-bot")
                        .with_header("X-Title", "Telegram Bot"),
                )),
                LlmProvider::OpenAi => models.push(Box::new(OpenAiCompatible::new(
                    "OpenAI",
                    OPENAI_URL,
                    key,
                    &config.openai_model,
                    client.clone(),
                ))),
                LlmProvider::Groq => models.push(Box::new(OpenAiCompatible::new(
                    "Groq",
                    GROQ_URL,
                    key,
                    &config.groq_model,
                    client.clone(),
                ))),
            }
        }

        Self::new(models, &config.personality, config.group_context.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.models.iter().map(|m| m.label()).collect()
    }

    pub fn prompt_for(&self, text: &str) -> String {
        build_prompt(persona_prompt(&self.personality), self.group_context.as_deref(), text)
    }

    /// First non-empty reply from the chain, or `None` when every model failed.
    pub async fn generate(&self, text: &str) -> Option<String> {
        let prompt = self.prompt_for(text);

        for (i, model) in self.models.iter().enumerate() {
            if i == 0 {
                info!("🤖 Asking {}", model.label());
            } else {
                info!("🔄 Falling back to {}", model.label());
            }

            match model.complete(&prompt).await {
                Ok(Some(reply)) => {
                    let preview: String = reply.chars().take(80).collect();
                    info!("✅ {} answered: \"{}\"", model.label(), preview);
                    return Some(reply);
                }
                Ok(None) => debug!("{} returned an empty answer", model.label()),
                Err(e @ ServiceError::RateLimited { .. }) => warn!("⚠️ {}", e),
                Err(e) => warn!("{} failed: {}", model.label(), e),
            }
        }

        if !self.models.is_empty() {
            warn!("❌ No model produced a reply");
        }
        None
    }

    /// Ask every model in turn and collect each outcome.
    pub async fn probe(&self, text: &str) -> Vec<(String, Result<Option<String>, ServiceError>)> {
        let prompt = self.prompt_for(text);
        let mut results = Vec::with_capacity(self.models.len());
        for model in &self.models {
            results.push((model.label(), model.complete(&prompt).await));
        }
        results
    }
}

pub const OPENROUTER_MODELS_URL: &str = "https://openrouter.ai/api/v1/models";

/// Substrings that mark a paid model as well known.
const POPULAR_MODEL_NAMES: &[&str] = &["gpt-4", "claude", "gemini", "llama", "mistral", "grok"];

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub completion: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub pricing: Option<ModelPricing>,
}

impl ModelInfo {
    pub fn is_free(&self) -> bool {
        self.id.contains(":free")
    }

    /// Vendor prefix of the id (`openai` in `openai/gpt-4o`).
    pub fn vendor(&self) -> &str {
        self.id.split_once('/').map_or("other", |(vendor, _)| vendor)
    }

    pub fn price_label(&self) -> String {
        match &self.pricing {
            None => "N/A".to_string(),
            Some(p) if is_zero(&p.prompt) && is_zero(&p.completion) => "free".to_string(),
            Some(p) => format!("${} prompt, ${} completion (per token)", p.prompt, p.completion),
        }
    }
}

fn is_zero(price: &str) -> bool {
    price.is_empty() || price.parse::<f64>().is_ok_and(|p| p == 0.0)
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

/// Fetch the public OpenRouter model catalog.
pub async fn fetch_openrouter_models(client: &reqwest::Client, url: &str) -> Result<Vec<ModelInfo>, ServiceError> {
    let response = client.get(url).timeout(Duration::from_secs(10)).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::status("OpenRouter", status, &body));
    }
    let list: ModelList = response
        .json()
        .await
        .map_err(|e| ServiceError::Parse(e.to_string()))?;
    Ok(list.data)
}

/// Catalog digest: free models grouped by vendor, plus well-known paid ones.
#[derive(Debug)]
pub struct ModelDigest {
    pub total: usize,
    pub free_total: usize,
    /// The first 30 free models, at most 5 per vendor, vendors sorted.
    pub free_by_vendor: std::collections::BTreeMap<String, Vec<ModelInfo>>,
    /// Up to 20 popular paid models, sorted by id.
    pub popular: Vec<ModelInfo>,
}

pub fn digest_models(models: &[ModelInfo]) -> ModelDigest {
    let (free, paid): (Vec<&ModelInfo>, Vec<&ModelInfo>) = models.iter().partition(|m| m.is_free());

    let mut free_by_vendor: std::collections::BTreeMap<String, Vec<ModelInfo>> = Default::default();
    for model in free.iter().take(30) {
        let group = free_by_vendor.entry(model.vendor().to_string()).or_default();
        if group.len() < 5 {
            group.push((*model).clone());
        }
    }

    let mut popular: Vec<ModelInfo> = paid
        .into_iter()
        .filter(|m| {
            let id = m.id.to_lowercase();
            POPULAR_MODEL_NAMES.iter().any(|name| id.contains(name))
        })
        .cloned()
        .collect();
    popular.sort_by(|a, b| a.id.cmp(&b.id));
    popular.truncate(20);

    ModelDigest {
        total: models.len(),
        free_total: free.len(),
        free_by_vendor,
        popular,
    }
}
