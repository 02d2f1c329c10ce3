use std::fmt;
use std::str::FromStr;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Implements `Display`, rusqlite `FromSql` and `ToSql` for a text-backed enum
/// that already has `as_str()` and `FromStr<Err = String>`.
#[macro_export]
macro_rules! impl_text_column {
    ($ty:ty) => {
        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::rusqlite::types::FromSql for $ty {
            fn column_result(value: ::rusqlite::types::ValueRef<'_>) -> ::rusqlite::types::FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty as ::std::str::FromStr>::from_str(s)
                    .map_err(|e| ::rusqlite::types::FromSqlError::Other(Box::new(::std::io::Error::other(e))))
            }
        }

        impl ::rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> ::rusqlite::Result<::rusqlite::types::ToSqlOutput<'_>> {
                Ok(::rusqlite::types::ToSqlOutput::Borrowed(::rusqlite::types::ValueRef::Text(
                    self.as_str().as_bytes(),
                )))
            }
        }
    };
}

/// Interface language chosen during onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Uz,
    Ru,
    En,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Uz, Language::Ru, Language::En];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Uz => "uz",
            Language::Ru => "ru",
            Language::En => "en",
        }
    }

    /// Label shown on the language picker
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Uz => "🇺🇿 O'zbekcha",
            Language::Ru => "🇷🇺 Русский",
            Language::En => "🇬🇧 English",
        }
    }

    /// Best match for a Telegram `language_code` such as "ru-RU"
    pub fn from_code(code: Option<&str>) -> Language {
        code.and_then(|c| c.split(['-', '_']).next())
            .and_then(|c| c.to_ascii_lowercase().parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uz" => Ok(Language::Uz),
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            _ => Err(format!("Unknown language: {}", s)),
        }
    }
}

impl_text_column!(Language);

/// Raw image payload
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Bytes,
    pub mime: String,
}

impl ImageData {
    pub fn new(bytes: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    pub fn jpeg(bytes: impl Into<Bytes>) -> Self {
        Self::new(bytes, "image/jpeg")
    }

    pub fn from_base64(data: &str, mime: impl Into<String>) -> Result<Self, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
        Ok(Self::new(bytes, mime))
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension matching the MIME type
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }

    /// MIME type guessed from a file name or object key
    pub fn mime_for_path(path: &str) -> &'static str {
        match std::path::Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        }
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageData({}, {} bytes)", self.mime, self.bytes.len())
    }
}

/// Durable reference to an image in object storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl rusqlite::types::FromSql for ImageRef {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        value.as_str().map(ImageRef::new)
    }
}

impl rusqlite::types::ToSql for ImageRef {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}
