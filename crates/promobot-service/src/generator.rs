//! HTTP client for the AI generation backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use promobot_telegram::{GenerationOutput, GenerationRequest, Generator, GeneratorError};

/// Timeout for one generation call. The backend enforces its own
/// deadline; this is the outer bound on a hung connection.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    kind: &'a str,
    category: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    content: String,
    #[serde(default)]
    tokens_used: i64,
}

/// [`Generator`] implementation over the backend's HTTP API.
pub struct HttpGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    /// Build a client for the backend at `base_url`.
    #[must_use]
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GeneratorError> {
        let body = GenerateBody {
            kind: request.kind.as_str(),
            category: &request.category,
            prompt: &request.prompt,
        };

        let mut req = self
            .http
            .post(format!("{}/generate", self.base_url))
            .timeout(GENERATION_TIMEOUT)
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| GeneratorError(e.to_string()))?;
        let response = response
            .error_for_status()
            .map_err(|e| GeneratorError(e.to_string()))?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError(e.to_string()))?;

        Ok(GenerationOutput {
            content: parsed.content,
            tokens_used: parsed.tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promobot_core::GenerationKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_the_request_and_parses_the_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header("authorization", "Bearer k1"))
            .and(body_partial_json(serde_json::json!({
                "kind": "text",
                "category": "electronics"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "Great headphones!",
                "tokens_used": 17
            })))
            .mount(&server)
            .await;

        let generator = HttpGenerator::new(server.uri(), Some("k1".into()));
        let output = generator
            .generate(GenerationRequest {
                kind: GenerationKind::Text,
                category: "electronics".into(),
                prompt: "headphones".into(),
            })
            .await
            .unwrap();

        assert_eq!(output.content, "Great headphones!");
        assert_eq!(output.tokens_used, 17);
    }

    #[tokio::test]
    async fn upstream_error_status_is_a_generator_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let generator = HttpGenerator::new(server.uri(), None);
        let err = generator
            .generate(GenerationRequest {
                kind: GenerationKind::Photo,
                category: "general".into(),
                prompt: "sneakers".into(),
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("503"));
    }
}
