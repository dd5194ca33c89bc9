use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{Config, DESCRIBE_IMAGE_PROMPT, DESCRIPTION_FIELD_HINT};
use crate::llm::describe::{DescribeError, DescribeImageInput, ImageDescriber, ImageDescription};
use crate::llm::media::DataUri;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionOutput {
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub max_output_tokens: i32,
    pub safety_settings: String,
    pub request_timeout: Duration,
}

impl GeminiSettings {
    pub fn from_config(config: &Config) -> Self {
        GeminiSettings {
            api_key: config.gemini_api_key.clone(),
            api_base: config.gemini_api_base.clone(),
            model: config.gemini_model.clone(),
            temperature: config.gemini_temperature,
            top_k: config.gemini_top_k,
            top_p: config.gemini_top_p,
            max_output_tokens: config.gemini_max_output_tokens,
            safety_settings: config.gemini_safety_settings.clone(),
            request_timeout: Duration::from_secs(config.gemini_request_timeout_seconds.max(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiDescriber {
    settings: GeminiSettings,
}

impl GeminiDescriber {
    pub fn new(settings: GeminiSettings) -> Self {
        Self { settings }
    }
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using standard thresholds.",
                profile
            );
            "BLOCK_MEDIUM_AND_ABOVE"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn normalize_gemini_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

fn description_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "description": {
                "type": "STRING",
                "description": DESCRIPTION_FIELD_HINT
            }
        },
        "required": ["description"]
    })
}

fn build_describe_payload(settings: &GeminiSettings, image: &DataUri) -> Value {
    let parts = vec![
        json!({ "text": DESCRIBE_IMAGE_PROMPT }),
        json!({
            "inlineData": {
                "mimeType": normalize_gemini_mime_type(&image.mime_type),
                "data": image.payload_base64()
            }
        }),
    ];

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": settings.temperature,
            "topK": settings.top_k,
            "topP": settings.top_p,
            "maxOutputTokens": settings.max_output_tokens,
            "responseMimeType": "application/json",
            "responseSchema": description_schema(),
        },
        "safetySettings": build_safety_settings(&settings.safety_settings),
    })
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_payload(payload: &Value) -> Value {
    let mut summary = Map::new();
    if let Some(parts) = payload
        .pointer("/contents/0/parts")
        .and_then(|value| value.as_array())
    {
        let summarized: Vec<Value> = parts
            .iter()
            .map(|part| {
                if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                    json!({ "text": truncate_for_log(text, 200) })
                } else if let Some(inline_data) = part.get("inlineData") {
                    let mime_type = inline_data
                        .get("mimeType")
                        .and_then(|value| value.as_str())
                        .unwrap_or("unknown");
                    let data_len = inline_data
                        .get("data")
                        .and_then(|value| value.as_str())
                        .map(|value| value.len())
                        .unwrap_or(0);
                    json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
                } else {
                    json!({ "unknownPart": true })
                }
            })
            .collect();
        summary.insert("parts".to_string(), Value::Array(summarized));
    }
    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }
    Value::Object(summary)
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                debug!(target: "llm.gemini", finish_reason = reason);
            }
        }
        if let Some(content) = candidate.content {
            for part in content.parts.unwrap_or_default() {
                if let Some(text) = part.text {
                    if !text.trim().is_empty() {
                        text_parts.push(text);
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Reads the structured `{ "description": ... }` answer, tolerating models that
/// ignore the response schema and answer in prose.
fn parse_description(text: &str) -> Result<ImageDescription, DescribeError> {
    let body = strip_code_fence(text);
    let description = match serde_json::from_str::<DescriptionOutput>(body) {
        Ok(output) => output.description.unwrap_or_default(),
        Err(_) if body.starts_with('{') => String::new(),
        Err(_) => body.to_string(),
    };

    let description = description.trim();
    if description.is_empty() {
        return Err(DescribeError::EmptyResult);
    }
    Ok(ImageDescription {
        description: description.to_string(),
    })
}

impl GeminiDescriber {
    async fn generate_content(&self, payload: &Value) -> Result<GeminiResponse, DescribeError> {
        let settings = &self.settings;
        let url = format!(
            "{}/models/{}:generateContent",
            settings.api_base, settings.model
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = %settings.model, payload = %summarize_payload(payload));
        }

        let response = get_http_client()
            .post(&url)
            .header("x-goog-api-key", &settings.api_key)
            .timeout(settings.request_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    err,
                    err.is_timeout(),
                    err.is_connect()
                );
                if err.is_timeout() {
                    DescribeError::Request("the AI provider timed out".to_string())
                } else {
                    DescribeError::Request(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            return Err(DescribeError::Provider {
                status: status.as_u16(),
                message: message.unwrap_or(body_summary),
            });
        }

        response
            .json::<GeminiResponse>()
            .await
            .map_err(|err| DescribeError::MalformedResponse(err.to_string()))
    }
}

#[async_trait]
impl ImageDescriber for GeminiDescriber {
    fn model_label(&self) -> String {
        format!("gemini/{}", self.settings.model)
    }

    async fn describe(&self, input: &DescribeImageInput) -> Result<ImageDescription, DescribeError> {
        let image = DataUri::parse(&input.photo_data_uri)?;
        if self.settings.api_key.trim().is_empty() {
            return Err(DescribeError::NotConfigured(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }

        let payload = build_describe_payload(&self.settings, &image);
        let metadata = json!({ "mimeType": image.mime_type, "bytes": image.data.len() });

        log_llm_timing(
            "gemini",
            &self.settings.model,
            "describe_image",
            Some(metadata),
            || async {
                let response = self.generate_content(&payload).await?;
                let text = extract_text_from_response(response);
                debug!(target: "llm.gemini", response = %truncate_for_log(&text, 200));
                parse_description(&text)
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GeminiSettings {
        GeminiSettings {
            api_key: "test-key".to_string(),
            api_base: "https://example.test/v1beta".to_string(),
            model: "gemini-test".to_string(),
            temperature: 0.4,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
            safety_settings: "standard".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn payload_puts_prompt_before_inline_image() {
        let image = DataUri::parse("data:image/jpg;base64,aGVsbG8=").unwrap();
        let payload = build_describe_payload(&settings(), &image);

        let parts = payload.pointer("/contents/0/parts").unwrap().as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], DESCRIBE_IMAGE_PROMPT);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(
            payload["generationConfig"]["responseSchema"]["required"][0],
            "description"
        );
        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn payload_summary_never_contains_image_bytes() {
        let image = DataUri::parse("data:image/png;base64,aGVsbG8=").unwrap();
        let summary = summarize_payload(&build_describe_payload(&settings(), &image));
        assert_eq!(summary["parts"][1]["inlineData"]["dataLen"], 8);
        assert!(!summary.to_string().contains("aGVsbG8="));
    }

    #[test]
    fn parses_structured_and_fenced_answers() {
        let plain = parse_description(
            r#"{"description": "A pothole is visible in the center of the road."}"#,
        )
        .unwrap();
        assert_eq!(
            plain.description,
            "A pothole is visible in the center of the road."
        );

        let fenced =
            parse_description("```json\n{\"description\": \"Broken streetlight.\"}\n```").unwrap();
        assert_eq!(fenced.description, "Broken streetlight.");

        let prose = parse_description("Graffiti covers the bus shelter.").unwrap();
        assert_eq!(prose.description, "Graffiti covers the bus shelter.");
    }

    #[test]
    fn empty_answers_are_an_error() {
        assert!(matches!(parse_description(""), Err(DescribeError::EmptyResult)));
        assert!(matches!(
            parse_description(r#"{"description": "   "}"#),
            Err(DescribeError::EmptyResult)
        ));
        assert!(matches!(
            parse_description(r#"{"other": 1}"#),
            Err(DescribeError::EmptyResult)
        ));
    }

    #[test]
    fn joins_text_parts_across_candidates() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "{\"description\":" }, { "text": " " }] } },
                { "content": { "parts": [{ "text": "\"x\"}" }] }, "finishReason": "STOP" }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text_from_response(response), "{\"description\":\n\"x\"}");
    }

    #[test]
    fn error_body_prefers_provider_message() {
        let (message, _) =
            summarize_error_body(r#"{"error": {"code": 400, "message": "API key not valid"}}"#);
        assert_eq!(message.as_deref(), Some("API key not valid"));
        let (message, summary) = summarize_error_body("");
        assert!(message.is_none());
        assert_eq!(summary, "empty response body");
    }

    #[tokio::test]
    async fn rejects_bad_input_before_any_request() {
        let describer = GeminiDescriber::new(settings());
        let err = describer
            .describe(&DescribeImageInput {
                photo_data_uri: "not a data uri".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DescribeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_api_key_is_reported() {
        let mut settings = settings();
        settings.api_key = String::new();
        let describer = GeminiDescriber::new(settings);
        let err = describer
            .describe(&DescribeImageInput {
                photo_data_uri: "data:image/png;base64,aGVsbG8=".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DescribeError::NotConfigured(_)));
    }
}
