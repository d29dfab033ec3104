//! Mock-value oracles for form fields.
//!
//! The engine asks an oracle for a plausible value per input. Oracles may be
//! slow or fail outright; [`fill_value`] bounds every call and substitutes
//! [`DEFAULT_FIELD_VALUE`] on any failure.

use crate::driver::ElementRef;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_FIELD_VALUE: &str = "test";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are an expert test data generator.";

#[derive(Error, Debug, Clone)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle API error: {0}")]
    Api(String),

    #[error("oracle returned no usable value")]
    Empty,

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),
}

/// Semantic attributes of one input control. Empty strings stand for
/// attributes the element does not carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub id: String,
    pub placeholder: String,
    pub input_type: String,
}

impl FieldDescriptor {
    pub fn from_element(element: &ElementRef) -> Self {
        let attr = |name: &str| element.attr(name).unwrap_or_default().trim().to_string();
        let input_type = match element.tag.as_str() {
            "textarea" => "textarea".to_string(),
            "select" => "select".to_string(),
            _ => attr("type").to_ascii_lowercase(),
        };
        Self {
            name: attr("name"),
            id: attr("id"),
            placeholder: attr("placeholder"),
            input_type,
        }
    }

    /// `name='q', type='search'` style summary of the non-empty attributes.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = [
            ("name", &self.name),
            ("id", &self.id),
            ("placeholder", &self.placeholder),
            ("type", &self.input_type),
        ]
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}='{}'", key, value))
        .collect();

        if parts.is_empty() {
            "no attributes".to_string()
        } else {
            parts.join(", ")
        }
    }

    fn hints(&self) -> String {
        format!("{} {} {}", self.name, self.id, self.placeholder).to_ascii_lowercase()
    }
}

#[async_trait]
pub trait MockValueOracle: Send + Sync {
    async fn generate(&self, field: &FieldDescriptor) -> Result<String, OracleError>;
}

/// Ask `oracle` for a value, falling back to [`DEFAULT_FIELD_VALUE`] when it
/// errors, answers blank, or does not answer within `timeout`.
pub async fn fill_value(
    oracle: &dyn MockValueOracle,
    field: &FieldDescriptor,
    timeout: Duration,
) -> String {
    let outcome = match tokio::time::timeout(timeout, oracle.generate(field)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(timeout)),
    };

    match outcome {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        Ok(_) => {
            warn!("Oracle returned a blank value for {}", field.describe());
            DEFAULT_FIELD_VALUE.to_string()
        }
        Err(e) => {
            warn!("Oracle failed for {}: {}", field.describe(), e);
            DEFAULT_FIELD_VALUE.to_string()
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Oracle backed by an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiOracle {
    pub fn new(api_key: impl Into<String>) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| OracleError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn user_prompt(field: &FieldDescriptor) -> String {
        format!(
            "Generate a realistic mock value for a form field with {}. \
             Keep it concise (e.g. 'john_doe', 'test@example.com', 'Password123').",
            field.describe()
        )
    }
}

#[async_trait]
impl MockValueOracle for OpenAiOracle {
    async fn generate(&self, field: &FieldDescriptor) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Requesting mock value from {} for {}", url, field.describe());

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(field),
                },
            ],
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if !status.is_success() {
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(OracleError::Api(format!("{}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| OracleError::Api(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(OracleError::Empty)
    }
}

/// Deterministic oracle keyed on declared type and name hints. Used when no
/// API key is configured.
#[derive(Debug, Clone, Default)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    pub fn new() -> Self {
        Self
    }

    pub fn value_for(field: &FieldDescriptor) -> &'static str {
        let hints = field.hints();
        match field.input_type.as_str() {
            "email" => return "test@example.com",
            "password" => return "Password123",
            "tel" => return "555-0100",
            "number" | "range" => return "42",
            "date" => return "2000-01-01",
            "url" => return "https://example.com",
            "search" => return "example",
            "textarea" => return "Sample text",
            _ => {}
        }

        if hints.contains("mail") {
            "test@example.com"
        } else if hints.contains("pass") {
            "Password123"
        } else if hints.contains("phone") || hints.contains("tel") {
            "555-0100"
        } else if hints.contains("user") || hints.contains("login") {
            "john_doe"
        } else if hints.contains("name") {
            "John Doe"
        } else if hints.contains("zip") || hints.contains("postal") {
            "10001"
        } else if hints.contains("search") || hints.contains("query") {
            "example"
        } else {
            DEFAULT_FIELD_VALUE
        }
    }
}

#[async_trait]
impl MockValueOracle for HeuristicOracle {
    async fn generate(&self, field: &FieldDescriptor) -> Result<String, OracleError> {
        Ok(Self::value_for(field).to_string())
    }
}
