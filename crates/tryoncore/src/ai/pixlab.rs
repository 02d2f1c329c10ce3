//! PixLab `bgremove` client.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::ai::{http_client, BackgroundRemover};
use crate::core::error::{AppResult, UpstreamError};
use crate::core::types::ImageData;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BgRemoveResponse {
    status: u16,
    #[serde(default)]
    img_data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct PixLabRemover {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PixLabRemover {
    pub fn new(base_url: &str, api_key: String) -> AppResult<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl BackgroundRemover for PixLabRemover {
    async fn remove_background(&self, image: &ImageData) -> Result<ImageData, UpstreamError> {
        let file = Part::bytes(image.bytes.to_vec())
            .file_name(format!("image.{}", image.extension()))
            .mime_str(&image.mime)
            .map_err(|e| UpstreamError::InvalidResponse(format!("bad mime type: {}", e)))?;
        let form = Form::new().part("file", file).text("key", self.api_key.clone());

        let response = self
            .http
            .post(format!("{}/bgremove", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let http_status = response.status().as_u16();
        let text = response.text().await?;
        let body: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| UpstreamError::InvalidResponse(format!("{}: {}", e, text)))?;
        let parsed: BgRemoveResponse =
            serde_json::from_value(body.clone()).map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        if parsed.status != 200 || !(200..300).contains(&http_status) {
            let message = parsed
                .error
                .unwrap_or_else(|| format!("PixLab status {}", parsed.status));
            let status = if (200..300).contains(&http_status) {
                parsed.status
            } else {
                http_status
            };
            return Err(UpstreamError::from_vendor(Some(status), Some(&body), &message));
        }

        let data = parsed
            .img_data
            .ok_or_else(|| UpstreamError::InvalidResponse("PixLab answer has no image".to_string()))?;
        ImageData::from_base64(&data, "image/png").map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }
}
