//! OpenAI chat-completions client used to write the try-on prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::{http_client, vendor_failure, PromptComposer};
use crate::core::error::{AppResult, UpstreamError};
use crate::generation::prompt;
use crate::session::types::LookItem;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct OpenAiComposer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiComposer {
    pub fn new(base_url: &str, api_key: String, model: &str) -> AppResult<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl PromptComposer for OpenAiComposer {
    async fn compose(&self, items: &[LookItem], refinement: Option<&str>) -> Result<String, UpstreamError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(prompt::composer_system_prompt(items)),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(prompt::composer_user_message(items, refinement)),
                },
            ],
            temperature: 0.5,
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(vendor_failure(response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| UpstreamError::InvalidResponse("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ImageRef;
    use crate::session::types::{GenderTag, ItemCategory};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn items() -> Vec<LookItem> {
        vec![LookItem {
            id: "1".into(),
            category: ItemCategory::Top,
            description: "green hoodie".into(),
            image_ref: ImageRef::new("a.jpg"),
            contains_person: false,
            gender: GenderTag::Unisex,
        }]
    }

    #[tokio::test]
    async fn test_compose_returns_trimmed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "  The model is wearing a green hoodie.\n" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let composer = OpenAiComposer::new(&server.uri(), "sk-test".into(), "gpt-4o-mini").expect("composer");
        let prompt = composer.compose(&items(), None).await.expect("prompt");
        assert_eq!(prompt, "The model is wearing a green hoodie.");
    }

    #[tokio::test]
    async fn test_insufficient_quota_is_quota_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "message": "You exceeded your current quota", "type": "insufficient_quota" }
            })))
            .mount(&server)
            .await;

        let composer = OpenAiComposer::new(&server.uri(), "sk-test".into(), "gpt-4o-mini").expect("composer");
        let result = composer.compose(&items(), Some("brighter")).await;
        assert!(matches!(result, Err(UpstreamError::QuotaExceeded(_))));
    }
}
