use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{PipelineError, ServiceRejection};
use crate::service::{GenerationRequest, ImageService};
use crate::types::EncodedImage;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Finish and block reasons that mean the content itself was refused.
const SAFETY_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "IMAGE_SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "SPII",
];

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Connection settings for [`GeminiService`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API base URL, without a trailing slash.
    pub endpoint: String,
    pub api_key: String,
    /// Per-request timeout (default: 120s).
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Read the key from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env() -> Result<Self, PipelineError> {
        std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
            .ok_or(PipelineError::MissingApiKey)
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = normalize(endpoint.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`ImageService`] backed by the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiService {
    http: Client,
    config: GeminiConfig,
}

impl GeminiService {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

impl ImageService for GeminiService {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<EncodedImage>, ServiceRejection> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint, request.model
        );

        let resp = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceRejection::interrupted(format!("Request to {} timed out", url))
                } else {
                    ServiceRejection::interrupted(format!("Failed to reach {}: {}", url, e))
                }
            })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ServiceRejection::interrupted(format!("Failed to read response: {}", e)))?;

        parse_response(status, &body)
    }
}

/// Build the JSON body for one `generateContent` call.
pub(crate) fn build_body(request: &GenerationRequest) -> Value {
    let mut parts = Vec::new();
    if let Some(input) = &request.input {
        parts.push(json!({
            "inlineData": {
                "mimeType": input.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&input.data),
            }
        }));
    }
    parts.push(json!({ "text": request.framing.prompt }));

    let safety: Vec<Value> = request
        .relaxed_safety
        .iter()
        .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect();

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "seed": request.seed,
            "responseModalities": ["TEXT", "IMAGE"],
        },
        "safetySettings": safety,
    });

    if let Some(system) = &request.framing.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    status: Option<String>,
    message: Option<String>,
}

/// Map an HTTP status and body to the service contract.
pub(crate) fn parse_response(
    status: u16,
    body: &str,
) -> Result<Option<EncodedImage>, ServiceRejection> {
    if !(200..300).contains(&status) {
        return Err(classify_error(status, body));
    }

    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ServiceRejection::interrupted(format!("Malformed response: {}", e)))?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ServiceRejection::safety(format!("Prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ServiceRejection::interrupted("The model returned no candidates"))?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    if parts.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".into());
        return Err(if SAFETY_REASONS.contains(&reason.as_str()) {
            ServiceRejection::safety(format!("Generation blocked: {}", reason))
        } else {
            ServiceRejection::interrupted(format!("Generation interrupted: {}", reason))
        });
    }

    let Some(inline) = parts.into_iter().find_map(|p| p.inline_data) else {
        return Ok(None);
    };

    let data = base64::engine::general_purpose::STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| ServiceRejection::interrupted(format!("Invalid image data: {}", e)))?;

    Ok(Some(EncodedImage::new(
        inline.mime_type.unwrap_or_else(|| "image/png".into()),
        data,
    )))
}

fn classify_error(status: u16, body: &str) -> ServiceRejection {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (code, api_status, message) = match envelope {
        Some(ErrorEnvelope { error }) => (
            error.code.unwrap_or(status),
            error.status.unwrap_or_default(),
            error.message.unwrap_or_default(),
        ),
        None => (status, String::new(), body.chars().take(200).collect()),
    };

    if status == 429 || code == 429 || api_status == "RESOURCE_EXHAUSTED" {
        ServiceRejection::quota(format!("HTTP {}: {}", status, message))
    } else {
        ServiceRejection::interrupted(format!("HTTP {} {}: {}", status, api_status, message))
    }
}
