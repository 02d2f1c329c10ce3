//! Durable image storage.
//!
//! Session state only ever holds [`ImageRef`]s; the bytes live here. Supabase Storage is
//! used when configured, otherwise a local directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::types::{ImageData, ImageRef};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `image` under `key` and returns its durable reference
    async fn put(&self, key: &str, image: &ImageData) -> AppResult<ImageRef>;

    async fn get(&self, image_ref: &ImageRef) -> AppResult<ImageData>;
}

/// Builds a collision-free key such as `42/items/3f0c...jpg`
pub fn object_key(chat_id: i64, kind: &str, image: &ImageData) -> String {
    format!("{}/{}/{}.{}", chat_id, kind, uuid::Uuid::new_v4(), image.extension())
}

/// Picks the backend from configuration
pub fn from_env() -> AppResult<Arc<dyn ObjectStore>> {
    match (
        config::storage::SUPABASE_URL.as_ref(),
        config::storage::SUPABASE_KEY.as_ref(),
    ) {
        (Some(url), Some(key)) => {
            log::info!("Object storage: Supabase bucket '{}'", *config::storage::SUPABASE_BUCKET);
            Ok(Arc::new(SupabaseObjectStore::new(
                url,
                key,
                &config::storage::SUPABASE_BUCKET,
            )?))
        }
        _ => {
            log::info!("Object storage: local directory '{}'", *config::storage::MEDIA_DIR);
            Ok(Arc::new(LocalObjectStore::new(&*config::storage::MEDIA_DIR)))
        }
    }
}

/// Supabase Storage REST backend
pub struct SupabaseObjectStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl SupabaseObjectStore {
    pub fn new(base_url: &str, api_key: &str, bucket: &str) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config::network::REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: bucket.to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    async fn put(&self, key: &str, image: &ImageData) -> AppResult<ImageRef> {
        let response = self
            .client
            .post(self.object_url(key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, image.mime.as_str())
            .body(image.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!("upload of {} failed with {}: {}", key, status, body)));
        }
        log::debug!("Stored {} ({} bytes)", key, image.len());
        Ok(ImageRef::new(key))
    }

    async fn get(&self, image_ref: &ImageRef) -> AppResult<ImageData> {
        let response = self
            .client
            .get(self.object_url(image_ref.as_str()))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Storage(format!("download of {} failed with {}", image_ref, status)));
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(str::to_string)
            .unwrap_or_else(|| ImageData::mime_for_path(image_ref.as_str()).to_string());
        let bytes = response.bytes().await?;
        Ok(ImageData::new(bytes, mime))
    }
}

/// Filesystem backend rooted at one directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(AppError::Storage(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, image: &ImageData) -> AppResult<ImageRef> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &image.bytes).await?;
        Ok(ImageRef::new(key))
    }

    async fn get(&self, image_ref: &ImageRef) -> AppResult<ImageData> {
        let path = self.path_for(image_ref.as_str())?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Storage(format!("cannot read {}: {}", image_ref, e)))?;
        Ok(ImageData::new(bytes, ImageData::mime_for_path(image_ref.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path());
        let image = ImageData::new(vec![9u8, 8, 7], "image/png");

        let key = object_key(7, "models", &image);
        assert!(key.starts_with("7/models/") && key.ends_with(".png"));

        let stored = store.put(&key, &image).await.expect("put");
        let loaded = store.get(&stored).await.expect("get");
        assert_eq!(loaded, image);
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path());
        let image = ImageData::jpeg(vec![1u8]);
        assert!(matches!(store.put("../etc/passwd", &image).await, Err(AppError::Storage(_))));
        assert!(matches!(store.put("/abs.jpg", &image).await, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_supabase_upload_and_download() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/looks/1/items/a.jpg"))
            .and(header("apikey", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"Key\":\"looks/1/items/a.jpg\"}"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/object/looks/1/items/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;

        let store = SupabaseObjectStore::new(&server.uri(), "secret", "looks").expect("store");
        let image = ImageData::jpeg(vec![1u8, 2, 3]);
        let stored = store.put("1/items/a.jpg", &image).await.expect("put");
        assert_eq!(stored, ImageRef::new("1/items/a.jpg"));

        let loaded = store.get(&stored).await.expect("get");
        assert_eq!(loaded, image);
    }

    #[tokio::test]
    async fn test_supabase_failure_is_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let store = SupabaseObjectStore::new(&server.uri(), "secret", "looks").expect("store");
        let result = store.put("1/items/a.jpg", &ImageData::jpeg(vec![1u8])).await;
        assert!(matches!(result, Err(AppError::Storage(msg)) if msg.contains("denied")));
    }
}
