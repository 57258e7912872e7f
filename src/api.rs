use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::{doc_id::DocumentId, similarity::SimilarityResult};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Row returned by the contextual search endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f64,
    pub title: String,
    #[serde(default)]
    pub document: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexRequest {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub creation_date: String,
}

/// A document the server holds embeddings for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub creation_date: String,
}

/// The similarity query, as consumed by the refresh pipeline.
pub trait SimilarityApi: Send + Sync {
    fn query_similar(
        &self,
        document_id: &DocumentId,
        window: &str,
    ) -> Result<Vec<SimilarityResult>, ApiError>;
}

pub struct ApiClient {
    api_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<ApiClient, ApiError> {
        let api_url = api_url.strip_suffix('/').unwrap_or(api_url).to_string();
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;

        Ok(ApiClient {
            api_url,
            api_key: api_key.to_string(),
            client,
        })
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        log::debug!("GET {}{}", self.api_url, url);
        self.client.get(format!("{}{}", self.api_url, url))
    }

    fn post(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        log::debug!("POST {}{}", self.api_url, url);
        self.client.post(format!("{}{}", self.api_url, url))
    }

    pub fn search(&self, query: &str, limit: usize, enhanced: bool) -> Result<Vec<SearchHit>, ApiError> {
        let path = if enhanced {
            "/search/enhanced-contextual-search"
        } else {
            "/search/contextual-search"
        };

        let limit = limit.to_string();
        let resp = self
            .get(path)
            .query(&[
                ("query", query),
                ("api_key", self.api_key.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()?;

        handle_response(resp)
    }

    pub fn index_document(&self, request: &IndexRequest) -> Result<(), ApiError> {
        let resp = self
            .post("/user/index-document")
            .json(&json!({
                "id": request.id,
                "title": request.title,
                "content": request.content,
                "creation_date": request.creation_date,
                "api_key": self.api_key,
            }))
            .send()?;

        handle_response::<serde_json::Value>(resp).map(|_| ())
    }

    pub fn indexed_documents(&self) -> Result<Vec<IndexedDocument>, ApiError> {
        let resp = self
            .get("/user/indexed-documents")
            .query(&[("api_key", self.api_key.as_str())])
            .send()?;

        handle_response(resp)
    }

    pub fn delete_document(&self, id: &DocumentId) -> Result<(), ApiError> {
        let resp = self
            .post("/user/delete-document")
            .json(&json!({
                "id": id,
                "api_key": self.api_key,
            }))
            .send()?;

        handle_response::<serde_json::Value>(resp).map(|_| ())
    }

    /// A short query-focused excerpt of one search hit.
    pub fn generate_blurb(&self, query: &str, hit: &SearchHit) -> Result<String, ApiError> {
        let resp = self
            .post("/search/generate-blurb")
            .json(&json!({
                "query": query,
                "title": hit.title,
                "document": hit.document,
                "api_key": self.api_key,
            }))
            .send()?;

        let status = resp.status();
        let text = resp.text()?;
        parse_blurb(status.as_u16(), &text)
    }
}

impl SimilarityApi for ApiClient {
    fn query_similar(
        &self,
        document_id: &DocumentId,
        window: &str,
    ) -> Result<Vec<SimilarityResult>, ApiError> {
        let resp = self
            .post("/search/similar-documents-with-window")
            .json(&json!({
                "document_id": document_id,
                "window": window,
                "api_key": self.api_key,
            }))
            .send()?;

        handle_response(resp)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error { error: String },
    Data(T),
}

fn handle_response<T>(response: reqwest::blocking::Response) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text()?;
    parse_body(status.as_u16(), &text)
}

fn parse_body<T>(status: u16, text: &str) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let web_response = serde_json::from_str::<WebResponse<T>>(text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        if (200..300).contains(&status) {
            ApiError::Decode(err)
        } else {
            ApiError::Server(format!("status {status}"))
        }
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error { error } => Err(ApiError::Server(error)),
    }
}

/// The blurb endpoint answers with a JSON string, or with bare text.
fn parse_blurb(status: u16, text: &str) -> Result<String, ApiError> {
    let trimmed = text.trim_start();
    if (200..300).contains(&status) && !trimmed.starts_with(['"', '{']) {
        return Ok(text.trim().to_string());
    }

    parse_body::<String>(status, text).map(|blurb| blurb.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_similarity_rows() {
        let rows: Vec<SimilarityResult> = parse_body(
            200,
            r#"[{"id":"a","title":"A.md","score":0.9},{"id":"b","title":"B.md","score":0.5}]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id.as_str(), "b");
    }

    #[test]
    fn test_error_body_becomes_server_error() {
        let result = parse_body::<Vec<SimilarityResult>>(200, r#"{"error":"document not found"}"#);
        assert!(matches!(result, Err(ApiError::Server(msg)) if msg == "document not found"));
    }

    #[test]
    fn test_non_json_error_status() {
        let result = parse_body::<Vec<SimilarityResult>>(502, "Bad Gateway");
        assert!(matches!(result, Err(ApiError::Server(msg)) if msg == "status 502"));
    }

    #[test]
    fn test_garbage_success_body_is_decode_error() {
        let result = parse_body::<Vec<SimilarityResult>>(200, "<html>");
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }

    #[test]
    fn test_search_hit_without_document() {
        let hits: Vec<SearchHit> = parse_body(200, r#"[{"score":1.5,"title":"x.md"}]"#).unwrap();
        assert_eq!(hits[0].document, "");
    }

    #[test]
    fn test_parse_indexed_documents() {
        let docs: Vec<IndexedDocument> = parse_body(
            200,
            r#"[{"id":"01a","title":"Rust.md","creation_date":"2024-03-01T10:00:00Z"},{"id":"01b","title":"Go.md"}]"#,
        )
        .unwrap();
        assert_eq!(docs[0].id.as_str(), "01a");
        assert_eq!(docs[1].creation_date, "");
    }

    #[test]
    fn test_parse_blurb_json_and_text() {
        assert_eq!(parse_blurb(200, r#""  Ownership rules. ""#).unwrap(), "Ownership rules.");
        assert_eq!(parse_blurb(200, "Borrowing in short.\n").unwrap(), "Borrowing in short.");
        assert!(matches!(
            parse_blurb(200, r#"{"error":"quota"}"#),
            Err(ApiError::Server(msg)) if msg == "quota"
        ));
        assert!(matches!(
            parse_blurb(500, "Internal Server Error"),
            Err(ApiError::Server(msg)) if msg == "status 500"
        ));
    }
}
