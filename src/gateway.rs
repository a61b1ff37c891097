//! Request orchestration around the hosted model.
//!
//! Every operation takes the credential as an argument and classifies
//! provider failures exactly once, in [`ModelGateway::call`]. Callers only
//! branch on [`GatewayError::AuthenticationRequired`] versus everything else.

use crate::auth::ApiKey;
use crate::parser::{AnalysisResult, ResponseParser};
use crate::prompts;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Provider messages that mean the key itself is missing, wrong or revoked.
const AUTH_FAILURE_MARKERS: [&str; 5] = [
    "api key not valid",
    "api_key_invalid",
    "api key expired",
    "requested entity was not found",
    "unauthenticated",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexQuote {
    pub name: String,
    pub symbol: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub change: f64,
    pub percent: String,
    #[serde(rename = "isUp", default)]
    pub is_up: Option<bool>,
}

impl IndexQuote {
    pub fn is_up(&self) -> bool {
        self.is_up.unwrap_or(self.change >= 0.0)
    }
}

/// Accepts `12.5`, `"+12.5"` or `"-1,024.30"`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(v) => Ok(v),
        NumberOrText::Text(text) => {
            let cleaned: String = text
                .trim()
                .trim_start_matches('+')
                .replace(['\u{2212}'], "-")
                .chars()
                .filter(|c| *c != ',' && !c.is_whitespace())
                .collect();
            cleaned
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("not a number: {text}")))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self { bytes, mime_type: mime_type.into() }
    }

    /// Decodes `data:<mime>;base64,<data>` or bare base64.
    pub fn from_data_url(raw: &str, fallback_mime: Option<&str>) -> anyhow::Result<Self> {
        let raw = raw.trim();
        let (mime_type, data) = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest
                    .split_once(',')
                    .ok_or_else(|| anyhow::anyhow!("malformed data URL"))?;
                let mime = header.split(';').next().unwrap_or_default();
                (mime.to_string(), data)
            }
            None => (String::new(), raw),
        };
        let mime_type = if mime_type.is_empty() {
            fallback_mime.unwrap_or("image/jpeg").to_string()
        } else {
            mime_type
        };
        let bytes = BASE64_STANDARD.decode(data.trim())?;
        Ok(Self::new(bytes, mime_type))
    }

    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(bytes, mime_for_path(path)))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64_STANDARD.encode(&self.bytes))
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

// ── Provider-neutral request shape ───────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum RequestPart {
    Text(String),
    InlineData { mime_type: String, data: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestContent {
    pub role: ChatRole,
    pub parts: Vec<RequestPart>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<RequestContent>,
    pub system_instruction: Option<String>,
    pub search_grounding: bool,
    pub json_response: bool,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("provider returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Network(String),
    #[error("unreadable provider response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Returns the concatenated reply text, possibly empty.
    async fn generate(&self, key: &ApiKey, request: &GenerateRequest) -> Result<String, TransportError>;
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Result of the central provider call, before per-operation mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderFailure {
    AuthenticationRequired,
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    AnalysisFailed(String),
    #[error("{0}")]
    ChatFailed(String),
}

impl GatewayError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationRequired)
    }
}

fn classify(error: &TransportError) -> ProviderFailure {
    if let TransportError::Http { status: 401, .. } = error {
        return ProviderFailure::AuthenticationRequired;
    }
    let message = error.message();
    let lowered = message.to_ascii_lowercase();
    if AUTH_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
        ProviderFailure::AuthenticationRequired
    } else {
        ProviderFailure::Other(message)
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct ModelIds {
    pub index: String,
    pub analysis: String,
    pub chat: String,
}

#[derive(Clone)]
pub struct ModelGateway {
    transport: Arc<dyn ModelTransport>,
    models: ModelIds,
    parser: ResponseParser,
}

impl ModelGateway {
    pub fn new(transport: Arc<dyn ModelTransport>, models: ModelIds, parser: ResponseParser) -> Self {
        Self { transport, models, parser }
    }

    async fn call(&self, key: Option<&ApiKey>, request: GenerateRequest) -> Result<String, ProviderFailure> {
        let Some(key) = key else {
            return Err(ProviderFailure::AuthenticationRequired);
        };
        debug!(model = %request.model, grounding = request.search_grounding, "calling model");
        self.transport
            .generate(key, &request)
            .await
            .map_err(|e| classify(&e))
    }

    /// Never fails except for authentication; anything else yields an empty list.
    pub async fn fetch_indices(&self, key: Option<&ApiKey>) -> Result<Vec<IndexQuote>, GatewayError> {
        let request = GenerateRequest {
            model: self.models.index.clone(),
            contents: vec![RequestContent {
                role: ChatRole::User,
                parts: vec![RequestPart::Text(prompts::INDEX_PROMPT.to_string())],
            }],
            system_instruction: None,
            search_grounding: true,
            json_response: true,
        };

        let text = match self.call(key, request).await {
            Ok(text) => text,
            Err(ProviderFailure::AuthenticationRequired) => {
                return Err(GatewayError::AuthenticationRequired);
            }
            Err(ProviderFailure::Other(message)) => {
                warn!("Index fetch failed, keeping previous snapshot: {}", message);
                return Ok(Vec::new());
            }
        };

        match parse_index_json(&text) {
            Ok(quotes) => {
                info!("Fetched {} index quotes", quotes.len());
                Ok(quotes)
            }
            Err(e) => {
                warn!("Index reply was not a JSON array: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn analyze_image(
        &self,
        key: Option<&ApiKey>,
        symbol: &str,
        image: &ImagePayload,
    ) -> Result<AnalysisResult, GatewayError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(GatewayError::InvalidRequest("symbol is required".to_string()));
        }
        if image.bytes.is_empty() {
            return Err(GatewayError::InvalidRequest("image is empty".to_string()));
        }

        let request = GenerateRequest {
            model: self.models.analysis.clone(),
            contents: vec![RequestContent {
                role: ChatRole::User,
                parts: vec![
                    RequestPart::Text(prompts::analysis_prompt(symbol)),
                    RequestPart::InlineData {
                        mime_type: image.mime_type.clone(),
                        data: BASE64_STANDARD.encode(&image.bytes),
                    },
                ],
            }],
            system_instruction: None,
            search_grounding: false,
            json_response: false,
        };

        match self.call(key, request).await {
            Ok(text) if text.trim().is_empty() => Err(GatewayError::AnalysisFailed(
                "model returned no analysis".to_string(),
            )),
            Ok(text) => {
                info!("Analysis for {} received ({} chars)", symbol, text.len());
                Ok(self.parser.parse(&text))
            }
            Err(ProviderFailure::AuthenticationRequired) => Err(GatewayError::AuthenticationRequired),
            Err(ProviderFailure::Other(message)) => Err(GatewayError::AnalysisFailed(message)),
        }
    }

    pub async fn send_chat(
        &self,
        key: Option<&ApiKey>,
        history: &[ChatMessage],
        symbol: &str,
        context: &str,
    ) -> Result<String, GatewayError> {
        if history.is_empty() {
            return Err(GatewayError::InvalidRequest("chat history is empty".to_string()));
        }

        let request = GenerateRequest {
            model: self.models.chat.clone(),
            contents: history
                .iter()
                .map(|msg| RequestContent {
                    role: msg.role,
                    parts: vec![RequestPart::Text(msg.text.clone())],
                })
                .collect(),
            system_instruction: Some(prompts::chat_system_instruction(symbol, context)),
            search_grounding: false,
            json_response: false,
        };

        match self.call(key, request).await {
            Ok(text) if text.trim().is_empty() => Ok(prompts::CHAT_FALLBACK_REPLY.to_string()),
            Ok(text) => Ok(text),
            Err(ProviderFailure::AuthenticationRequired) => Err(GatewayError::AuthenticationRequired),
            Err(ProviderFailure::Other(message)) => Err(GatewayError::ChatFailed(message)),
        }
    }
}

fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```JSON", "").replace("```", "").trim().to_string()
}

pub fn parse_index_json(text: &str) -> Result<Vec<IndexQuote>, serde_json::Error> {
    serde_json::from_str(&strip_code_fences(text))
}
