//! `generateContent` over the Gemini REST API.

use crate::auth::ApiKey;
use crate::gateway::{GenerateRequest, ModelTransport, RequestPart, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct GeminiTransport {
    client: Client,
    base_url: String,
}

impl GeminiTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelTransport for GeminiTransport {
    async fn generate(&self, key: &ApiKey, request: &GenerateRequest) -> Result<String, TransportError> {
        let url = format!("{}/{}:generateContent", self.base_url, request.model);
        let body = WireRequest::from(request);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        Ok(parsed.text())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireInlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
struct WireTool {
    #[serde(rename = "google_search")]
    google_search: WireGoogleSearch,
}

#[derive(Serialize, Default)]
struct WireGoogleSearch {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    response_mime_type: String,
}

impl From<&GenerateRequest> for WireRequest {
    fn from(request: &GenerateRequest) -> Self {
        let contents = request
            .contents
            .iter()
            .map(|content| WireContent {
                role: Some(content.role.as_str().to_string()),
                parts: content.parts.iter().map(wire_part).collect(),
            })
            .collect();

        let system_instruction = request.system_instruction.as_ref().map(|text| WireContent {
            role: None,
            parts: vec![WirePart::Text { text: text.clone() }],
        });

        let tools = if request.search_grounding {
            vec![WireTool::default()]
        } else {
            Vec::new()
        };

        let generation_config = request.json_response.then(|| WireGenerationConfig {
            response_mime_type: "application/json".to_string(),
        });

        Self { contents, system_instruction, tools, generation_config }
    }
}

fn wire_part(part: &RequestPart) -> WirePart {
    match part {
        RequestPart::Text(text) => WirePart::Text { text: text.clone() },
        RequestPart::InlineData { mime_type, data } => WirePart::InlineData {
            inline_data: WireInlineData {
                mime_type: mime_type.clone(),
                data: data.clone(),
            },
        },
    }
}

#[derive(Deserialize)]
struct WireResponse {
    candidates: Option<Vec<WireCandidate>>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: Option<WireResponseContent>,
}

#[derive(Deserialize)]
struct WireResponseContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
struct WireResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

impl WireResponse {
    /// Text parts of the first candidate, thinking parts excluded.
    fn text(self) -> String {
        self.candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| {
            let status = wrapper.error.status.unwrap_or_default();
            let message = wrapper.error.message.unwrap_or_else(|| body.to_string());
            if status.is_empty() {
                message
            } else {
                format!("{status}: {message}")
            }
        })
        .unwrap_or_else(|_| body.to_string())
}
