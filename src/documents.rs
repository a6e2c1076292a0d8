//! Document store boundary: the knowledge files backing retrieval, plus
//! text extraction for files attached directly to a chat message.

use crate::constants::OPENAI_BASE_URL;
use crate::types::{CourierError, Result};
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub filename: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// The retrieval corpus behind the assistant. Listing, adding and
/// removing documents reindexes what confirmed-source answers can cite.
pub trait DocumentStore: Send + Sync {
    fn list_documents(&self) -> BoxFuture<'_, Result<Vec<StoredDocument>>>;

    fn upload_document<'a>(
        &'a self,
        filename: &'a str,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<StoredDocument>>;

    fn delete_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Raw content of a stored document, for client-side preview.
    fn download_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Bytes>>;
}

/// Extracts plain text from an uploaded attachment so it can be inlined
/// into a file-grounded request.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, filename: &str, mime_type: &str, bytes: &[u8]) -> Result<String>;
}

/// Passes textual payloads through unchanged; anything else is refused
/// rather than inlined as garbage.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, filename: &str, mime_type: &str, bytes: &[u8]) -> Result<String> {
        let textual = mime_type.starts_with("text/")
            || matches!(mime_type, "application/json" | "application/xml")
            || filename.ends_with(".md")
            || filename.ends_with(".csv");
        if !textual {
            return Err(CourierError::Extraction(format!(
                "unsupported attachment type: {} ({})",
                filename, mime_type
            ))
            .into());
        }
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(CourierError::Extraction(format!(
                "attachment {} is not valid UTF-8",
                filename
            ))
            .into()),
        }
    }
}

/// HTTP implementation over the upstream files + vector-store APIs. Each
/// uploaded file is attached to the configured vector store so runs can
/// retrieve from it.
#[derive(Clone)]
pub struct VectorStoreClient {
    client: reqwest::Client,
    api_key: String,
    vector_store_id: String,
    base_url: String,
}

impl VectorStoreClient {
    pub fn new(client: reqwest::Client, api_key: String, vector_store_id: String) -> Self {
        Self {
            client,
            api_key,
            vector_store_id,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.text().await {
            Ok(t) => t,
            Err(_) => "Unknown error (failed to read response text)".to_string(),
        };
        Err(CourierError::Upstream(status, body).into())
    }
}

impl DocumentStore for VectorStoreClient {
    fn list_documents(&self) -> BoxFuture<'_, Result<Vec<StoredDocument>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!(
                    "{}/vector_stores/{}/files",
                    self.base_url, self.vector_store_id
                ))
                .bearer_auth(&self.api_key)
                .header("OpenAI-Beta", "assistants=v2")
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let body: serde_json::Value = response.json().await.map_err(CourierError::Network)?;

            let mut documents = Vec::new();
            for entry in body["data"].as_array().into_iter().flatten() {
                let Some(file_id) = entry["id"].as_str() else {
                    continue;
                };
                // The vector-store listing carries no filename; fetch the
                // file record for display metadata.
                let file = self
                    .client
                    .get(format!("{}/files/{}", self.base_url, file_id))
                    .bearer_auth(&self.api_key)
                    .send()
                    .await
                    .map_err(CourierError::Network)?;
                let file = Self::check(file).await?;
                let file: serde_json::Value = file.json().await.map_err(CourierError::Network)?;
                documents.push(StoredDocument {
                    id: file_id.to_string(),
                    filename: file["filename"].as_str().unwrap_or("unknown").to_string(),
                    size_bytes: file["bytes"].as_u64().unwrap_or(0),
                    created_at: file["created_at"].as_i64().unwrap_or(0),
                });
            }
            Ok(documents)
        })
    }

    fn upload_document<'a>(
        &'a self,
        filename: &'a str,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<StoredDocument>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(bytes.to_vec())
                .file_name(filename.to_string());
            let form = reqwest::multipart::Form::new()
                .text("purpose", "assistants")
                .part("file", part);

            let response = self
                .client
                .post(format!("{}/files", self.base_url))
                .bearer_auth(&self.api_key)
                .multipart(form)
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let file: serde_json::Value = response.json().await.map_err(CourierError::Network)?;
            let file_id = match file["id"].as_str() {
                Some(id) => id.to_string(),
                None => {
                    return Err(CourierError::Upstream(
                        StatusCode::BAD_GATEWAY,
                        "file upload returned no id".to_string(),
                    )
                    .into())
                }
            };

            let attach = self
                .client
                .post(format!(
                    "{}/vector_stores/{}/files",
                    self.base_url, self.vector_store_id
                ))
                .bearer_auth(&self.api_key)
                .header("OpenAI-Beta", "assistants=v2")
                .json(&serde_json::json!({ "file_id": file_id }))
                .send()
                .await
                .map_err(CourierError::Network)?;
            Self::check(attach).await?;

            Ok(StoredDocument {
                id: file_id,
                filename: filename.to_string(),
                size_bytes: file["bytes"].as_u64().unwrap_or(0),
                created_at: file["created_at"].as_i64().unwrap_or(0),
            })
        })
    }

    fn delete_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let detach = self
                .client
                .delete(format!(
                    "{}/vector_stores/{}/files/{}",
                    self.base_url, self.vector_store_id, id
                ))
                .bearer_auth(&self.api_key)
                .header("OpenAI-Beta", "assistants=v2")
                .send()
                .await
                .map_err(CourierError::Network)?;
            Self::check(detach).await?;

            let delete = self
                .client
                .delete(format!("{}/files/{}", self.base_url, id))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(CourierError::Network)?;
            Self::check(delete).await?;
            Ok(())
        })
    }

    fn download_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/files/{}/content", self.base_url, id))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            response.bytes().await.map_err(|e| CourierError::Network(e).into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extractor_accepts_text_mimes() {
        let extractor = PlainTextExtractor;
        let text = extractor
            .extract("notes.txt", "text/plain", b"hello world")
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn plain_text_extractor_rejects_binaries() {
        let extractor = PlainTextExtractor;
        let result = extractor.extract("a.pdf", "application/pdf", b"%PDF-1.4");
        assert!(result.is_err());
    }

    #[test]
    fn plain_text_extractor_rejects_invalid_utf8() {
        let extractor = PlainTextExtractor;
        let result = extractor.extract("weird.txt", "text/plain", &[0xff, 0xfe, 0x00]);
        assert!(result.is_err());
    }
}
