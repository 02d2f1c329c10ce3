//! Gemini `generateContent` REST client.
//!
//! One client serves four capabilities: model validation and batch categorization on the
//! vision model, garment isolation and try-on synthesis on the image model.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ai::json::parse_embedded;
use crate::ai::{
    http_client, vendor_failure, GarmentIsolator, ImageSynthesizer, ItemCategorizer, ItemClassification, ModelValidator,
    ValidationVerdict,
};
use crate::core::error::{AppResult, UpstreamError};
use crate::core::types::ImageData;
use crate::generation::prompt;
use crate::session::types::{GenderTag, ItemCategory, ModelPhotoPolicy};

/// Finish reasons that mean the vendor refused on policy grounds
const SAFETY_FINISH_REASONS: [&str; 5] = ["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST", "SPII"];

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    vision_model: String,
    image_model: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    valid: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    gender: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    #[serde(default)]
    image_index: usize,
    #[serde(default)]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    is_prohibited: bool,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    contains_person: bool,
}

fn image_part(image: &ImageData) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime,
            "data": image.to_base64(),
        }
    })
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: Option<String>, vision_model: &str, image_model: &str) -> AppResult<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            vision_model: vision_model.to_string(),
            image_model: image_model.to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    /// Posts one request and returns the first candidate, after safety checks
    async fn generate(&self, model: &str, body: Value) -> Result<Value, UpstreamError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(UpstreamError::MissingCredential("GEMINI_API_KEY"))?;

        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(vendor_failure(response).await);
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(UpstreamError::SafetyRejected(reason.to_string()));
        }

        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .cloned()
            .ok_or_else(|| UpstreamError::InvalidResponse("no candidates".to_string()))?;

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            if SAFETY_FINISH_REASONS.contains(&reason) {
                return Err(UpstreamError::SafetyRejected(reason.to_string()));
            }
        }
        Ok(candidate)
    }

    fn parts(candidate: &Value) -> Vec<Value> {
        candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn text_of(candidate: &Value) -> Result<String, UpstreamError> {
        let text: String = Self::parts(candidate)
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if text.trim().is_empty() {
            return Err(UpstreamError::InvalidResponse("empty text answer".to_string()));
        }
        Ok(text)
    }

    fn image_of(candidate: &Value) -> Result<ImageData, UpstreamError> {
        for part in Self::parts(candidate) {
            let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
                continue;
            };
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return ImageData::from_base64(data, mime)
                .map_err(|e| UpstreamError::InvalidResponse(format!("bad image data: {}", e)));
        }
        Err(UpstreamError::InvalidResponse("no image in answer".to_string()))
    }

    async fn json_answer(&self, parts: Vec<Value>) -> Result<String, UpstreamError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json", "temperature": 0.1 },
        });
        let candidate = self.generate(&self.vision_model, body).await?;
        Self::text_of(&candidate)
    }

    async fn image_answer(&self, parts: Vec<Value>, system: Option<&str>, temperature: f64) -> Result<ImageData, UpstreamError> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"], "temperature": temperature },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        let candidate = self.generate(&self.image_model, body).await?;
        Self::image_of(&candidate)
    }
}

#[async_trait]
impl ModelValidator for GeminiClient {
    async fn validate(&self, image: &ImageData, policy: ModelPhotoPolicy) -> Result<ValidationVerdict, UpstreamError> {
        let instruction = format!(
            "Decide whether this photo can be used as the base for a virtual try-on. {} \
             Also detect the gender of the person (male or female). \
             Answer only with JSON: {{\"valid\": boolean, \"reason\": string, \"gender\": \"male\" | \"female\"}}. \
             When invalid, explain the reason in one short sentence.",
            policy.requirement()
        );
        let text = self
            .json_answer(vec![image_part(image), json!({ "text": instruction })])
            .await?;
        let raw: RawVerdict = parse_embedded(&text)?;

        Ok(ValidationVerdict {
            valid: raw.valid,
            reason: raw.reason.filter(|r| !r.trim().is_empty()),
            gender: raw.gender.and_then(|g| g.parse().ok()),
        })
    }
}

#[async_trait]
impl ItemCategorizer for GeminiClient {
    async fn categorize(&self, images: &[ImageData]) -> Result<Vec<ItemClassification>, UpstreamError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let mut parts: Vec<Value> = images.iter().map(image_part).collect();
        parts.push(json!({ "text": prompt::categorization_instruction(images.len()) }));
        let text = self.json_answer(parts).await?;
        let raw: Vec<RawItem> = parse_embedded(&text)?;

        let items = raw
            .into_iter()
            .filter_map(|item| {
                if item.image_index >= images.len() {
                    log::warn!("Categorizer referenced image {} of {}, skipping", item.image_index, images.len());
                    return None;
                }
                let description = item.description.trim();
                Some(ItemClassification {
                    image_index: item.image_index,
                    category: item.category.parse().unwrap_or(ItemCategory::Unknown),
                    description: if description.is_empty() {
                        "item".to_string()
                    } else {
                        description.to_string()
                    },
                    is_prohibited: item.is_prohibited,
                    gender: item
                        .gender
                        .and_then(|g| g.parse().ok())
                        .unwrap_or(GenderTag::Unisex),
                    contains_person: item.contains_person,
                })
            })
            .collect();
        Ok(items)
    }
}

#[async_trait]
impl GarmentIsolator for GeminiClient {
    async fn isolate(&self, image: &ImageData, description: &str) -> Result<ImageData, UpstreamError> {
        let parts = vec![
            image_part(image),
            json!({ "text": prompt::isolation_instruction(description) }),
        ];
        self.image_answer(parts, None, 0.1).await
    }
}

#[async_trait]
impl ImageSynthesizer for GeminiClient {
    async fn synthesize(&self, model: &ImageData, items: &[ImageData], prompt_text: &str) -> Result<ImageData, UpstreamError> {
        let mut parts = vec![image_part(model)];
        parts.extend(items.iter().map(image_part));
        parts.push(json!({ "text": prompt_text }));
        self.image_answer(parts, Some(prompt::SYNTHESIS_RULES), 0.2).await
    }
}
