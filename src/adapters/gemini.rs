use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::adapters::env_secrets::GEMINI_API_KEY;
use crate::domain::quiz::strip_code_fences;
use crate::domain::{
    Completion, CompletionRequest, Content, FailureKind, GenerationOptions, InlineData,
    ModelEndpoint, Part, ProviderError, Role,
};
use crate::ports::{HttpClient, HttpResponse, ModelClient, SecretProvider};

/// Longest slice of an unparseable error body kept in messages.
const MAX_ERROR_BODY: usize = 300;

/// `generateContent` client for the generative language API.
pub struct GeminiClient {
    http: Arc<dyn HttpClient>,
    secrets: Arc<dyn SecretProvider>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        secrets: Arc<dyn SecretProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            secrets,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let key = self.secrets.secret(GEMINI_API_KEY).ok_or_else(|| {
            ProviderError::new(
                FailureKind::PermissionDenied,
                format!("{GEMINI_API_KEY} is not set"),
            )
        })?;

        let body = build_request_body(request);
        let headers = [("x-goog-api-key", key.expose().to_string())];

        let response = self
            .http
            .post_json(&self.url(&endpoint.id), &headers, &body)
            .await
            .map_err(|e| ProviderError::transport(e.to_string()))?;

        debug!(model = %endpoint.id, status = response.status, "generateContent responded");
        parse_response(&endpoint.id, &request.options, &response)
    }
}

/// Build the `generateContent` JSON body.
pub fn build_request_body(request: &CompletionRequest) -> Value {
    let mut body = Map::new();
    body.insert(
        "contents".to_string(),
        Value::Array(request.contents.iter().map(content_json).collect()),
    );

    if let Some(instruction) = &request.system_instruction {
        body.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": instruction }] }),
        );
    }

    let config = generation_config(&request.options);
    if !config.is_empty() {
        body.insert("generationConfig".to_string(), Value::Object(config));
    }
    Value::Object(body)
}

fn content_json(content: &Content) -> Value {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "model",
    };
    let parts: Vec<Value> = content
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::Inline(data) => json!({
                "inlineData": { "mimeType": data.mime_type, "data": data.data }
            }),
        })
        .collect();
    json!({ "role": role, "parts": parts })
}

fn generation_config(options: &GenerationOptions) -> Map<String, Value> {
    let mut config = Map::new();
    if let Some(t) = options.temperature {
        config.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = options.top_p {
        config.insert("topP".to_string(), json!(p));
    }
    if let Some(k) = options.top_k {
        config.insert("topK".to_string(), json!(k));
    }
    if let Some(n) = options.max_output_tokens {
        config.insert("maxOutputTokens".to_string(), json!(n));
    }
    if let Some(mime) = &options.response_mime_type {
        config.insert("responseMimeType".to_string(), json!(mime));
    }
    if let Some(schema) = &options.response_schema {
        config.insert("responseSchema".to_string(), schema.clone());
    }
    if let Some(image) = &options.image_output {
        config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
        config.insert(
            "imageConfig".to_string(),
            json!({ "aspectRatio": image.aspect_ratio, "imageSize": image.size }),
        );
    }
    config
}

/// Classify a `generateContent` response into a completion or a failure.
pub fn parse_response(
    model: &str,
    options: &GenerationOptions,
    response: &HttpResponse,
) -> Result<Completion, ProviderError> {
    if !response.is_success() {
        return Err(classify_error(response));
    }

    let value: Value = serde_json::from_str(&response.body)
        .map_err(|e| ProviderError::malformed(format!("response is not JSON: {e}")))?;

    let candidate = match value.get("candidates").and_then(Value::as_array) {
        Some(candidates) => candidates.first(),
        None if value.is_object() => None,
        None => return Err(ProviderError::malformed("response is not an object")),
    };

    let Some(parts) = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
    else {
        let reason = value
            .pointer("/promptFeedback/blockReason")
            .or_else(|| candidate.and_then(|c| c.get("finishReason")))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(ProviderError::empty(reason.to_string()));
    };

    let mut text = String::new();
    let mut inline_data = None;
    for part in parts {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
        if inline_data.is_none() {
            if let Some(data) = part.get("inlineData") {
                inline_data = Some(InlineData::new(
                    data.get("mimeType").and_then(Value::as_str).unwrap_or("image/png"),
                    data.get("data").and_then(Value::as_str).unwrap_or_default(),
                ));
            }
        }
    }

    let text = (!text.trim().is_empty()).then_some(text);
    let inline_data = inline_data.filter(|d| !d.data.is_empty());

    let json: Option<Value> = match (&text, options.wants_json()) {
        (Some(t), true) => Some(
            serde_json::from_str(&strip_code_fences(t))
                .map_err(|e| ProviderError::malformed(format!("expected JSON output: {e}")))?,
        ),
        _ => None,
    };

    let completion = Completion {
        model: model.to_string(),
        text,
        json,
        inline_data,
    };
    if !completion.has_content() {
        return Err(ProviderError::empty("candidate has no text or inline data"));
    }
    Ok(completion)
}

/// Map an error response through the closed classification table.
fn classify_error(response: &HttpResponse) -> ProviderError {
    let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let provider_status = error.and_then(|e| e.get("status")).and_then(Value::as_str);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| response.body.chars().take(MAX_ERROR_BODY).collect());

    ProviderError::from_http(response.status, provider_status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::env_secrets::StaticSecretProvider;
    use crate::adapters::http_client::GuardedHttpClient;
    use crate::domain::config::NetworkConfig;
    use crate::domain::ImageOutput;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(body: Value) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest::from_parts(vec![
            Part::Inline(InlineData::new("image/png", "AAAA")),
            Part::Text("review".to_string()),
        ])
        .with_system_instruction("persona")
        .with_options(GenerationOptions {
            temperature: Some(0.0),
            top_k: Some(1),
            response_mime_type: Some("application/json".to_string()),
            image_output: Some(ImageOutput {
                aspect_ratio: "16:9".to_string(),
                size: "2K".to_string(),
            }),
            ..Default::default()
        });

        let body = build_request_body(&request);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "review");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "persona");
        assert_eq!(body["generationConfig"]["topK"], 1);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], "2K");
        assert!(body["generationConfig"].get("topP").is_none());
    }

    #[test]
    fn test_plain_request_has_no_generation_config() {
        let body = build_request_body(&CompletionRequest::text("hi"));
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_text_and_skip_thoughts() {
        let response = ok(json!({
            "candidates": [{"content": {"parts": [
                {"text": "thinking...", "thought": true},
                {"text": "Use more "},
                {"text": "whitespace."}
            ]}}]
        }));
        let completion = parse_response("m", &GenerationOptions::default(), &response).unwrap();
        assert_eq!(completion.text.as_deref(), Some("Use more whitespace."));
        assert_eq!(completion.model, "m");
    }

    #[test]
    fn test_parse_inline_image() {
        let response = ok(json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "iVBOR"}}
            ]}}]
        }));
        let completion = parse_response("m", &GenerationOptions::default(), &response).unwrap();
        assert_eq!(completion.inline_data.unwrap().data, "iVBOR");
        assert!(completion.text.is_none());
    }

    #[test]
    fn test_parse_json_output() {
        let options = GenerationOptions {
            response_mime_type: Some("application/json".to_string()),
            ..Default::default()
        };
        let response = ok(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"analysis\": \"ok\"}"}]}}]
        }));
        let completion = parse_response("m", &options, &response).unwrap();
        assert_eq!(completion.json.unwrap()["analysis"], "ok");

        let broken = ok(json!({
            "candidates": [{"content": {"parts": [{"text": "{not json"}]}}]
        }));
        let err = parse_response("m", &options, &broken).unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
    }

    #[test]
    fn test_empty_candidates_are_empty_content() {
        let blocked = ok(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        let err = parse_response("m", &GenerationOptions::default(), &blocked).unwrap_err();
        assert_eq!(err.kind, FailureKind::EmptyContent);
        assert!(err.message.contains("SAFETY"));

        let blank = ok(json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]}));
        let err = parse_response("m", &GenerationOptions::default(), &blank).unwrap_err();
        assert_eq!(err.kind, FailureKind::EmptyContent);
    }

    #[test]
    fn test_non_json_body_is_malformed() {
        let response = HttpResponse {
            status: 200,
            body: "<html>".to_string(),
        };
        let err = parse_response("m", &GenerationOptions::default(), &response).unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
    }

    #[test]
    fn test_error_body_classification() {
        let response = HttpResponse {
            status: 429,
            body: json!({"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}})
                .to_string(),
        };
        let err = parse_response("m", &GenerationOptions::default(), &response).unwrap_err();
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "Quota exceeded");

        let response = HttpResponse {
            status: 403,
            body: json!({"error": {"code": 403, "message": "denied", "status": "PERMISSION_DENIED"}})
                .to_string(),
        };
        let err = parse_response("m", &GenerationOptions::default(), &response).unwrap_err();
        assert!(err.is_fatal());

        let response = HttpResponse {
            status: 502,
            body: "Bad Gateway".to_string(),
        };
        let err = parse_response("m", &GenerationOptions::default(), &response).unwrap_err();
        assert_eq!(err.kind, FailureKind::Unavailable);
        assert_eq!(err.message, "Bad Gateway");
    }

    #[tokio::test]
    async fn test_missing_key_is_fatal() {
        let http = Arc::new(GuardedHttpClient::new(&NetworkConfig::default()).unwrap());
        let client = GeminiClient::new(
            http,
            Arc::new(StaticSecretProvider::default()),
            "https://generativelanguage.googleapis.com",
        );
        let err = client
            .complete(&ModelEndpoint::primary("gemini-2.5-flash"), &CompletionRequest::text("hi"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Looks balanced."}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = Arc::new(
            GuardedHttpClient::new(&NetworkConfig {
                request_timeout_secs: 5,
                allowed_domains: vec!["127.0.0.1".to_string()],
            })
            .unwrap(),
        );
        let secrets = Arc::new(StaticSecretProvider::new([(GEMINI_API_KEY, "test-key")]));
        let client = GeminiClient::new(http, secrets, format!("{}/", server.uri()));

        let completion = client
            .complete(&ModelEndpoint::primary("gemini-2.0-flash"), &CompletionRequest::text("hi"))
            .await
            .unwrap();
        assert_eq!(completion.text.as_deref(), Some("Looks balanced."));
        assert_eq!(completion.model, "gemini-2.0-flash");
    }
}
