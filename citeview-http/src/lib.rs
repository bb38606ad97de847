//! HTTP transports for the chat backend's file and relevant-page endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use citeview_core::{FetchError, FileTransport, RelevanceTransport, ResolutionError};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct RelevantPageRequest<'a> {
    file_name: &'a str,
    query: &'a str,
}

#[derive(Deserialize)]
struct RelevantPageResponse {
    #[serde(alias = "pageNumber", alias = "page_number")]
    page_num: i64,
}

impl HttpTransport {
    /// `base_url` is the API root, e.g. `http://host:8000/api`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        anyhow::ensure!(!base_url.trim().is_empty(), "missing API base URL");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    normalize_err_body(&body)
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["error", "content", "detail"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    trimmed.chars().take(200).collect()
}

#[async_trait]
impl FileTransport for HttpTransport {
    #[instrument(skip(self))]
    async fn fetch(&self, file_name: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(self.endpoint("files"))
            .query(&[("file_name", file_name)])
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                file_name: file_name.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        debug!(size = bytes.len(), "received file");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RelevanceTransport for HttpTransport {
    #[instrument(skip(self, query))]
    async fn relevant_page(&self, file_name: &str, query: &str) -> Result<i64, ResolutionError> {
        let response = self
            .client
            .post(self.endpoint("files/relevant_page"))
            .json(&RelevantPageRequest { file_name, query })
            .send()
            .await
            .map_err(|err| ResolutionError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        let body = response
            .json::<RelevantPageResponse>()
            .await
            .map_err(|err| ResolutionError::Transport(format!("invalid response: {err}")))?;
        Ok(body.page_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response per connection and hands back the raw
    /// request heads it saw.
    async fn serve(responses: Vec<(u16, &'static str, Vec<u8>)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, content_type, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 16 * 1024];
                let n = socket.read(&mut buf).await.unwrap();
                seen.push(String::from_utf8_lossy(&buf[..n]).into_owned());
                let head = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        (format!("http://{addr}/api/"), handle)
    }

    fn transport(base_url: &str) -> HttpTransport {
        HttpTransport::new(base_url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetch_downloads_file_bytes() {
        let (base, server) = serve(vec![(200, "application/pdf", b"%PDF-1.7".to_vec())]).await;
        let bytes = transport(&base).fetch("annual report.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");

        let requests = server.await.unwrap();
        assert!(
            requests[0].starts_with("GET /api/files?file_name=annual+report.pdf "),
            "{}",
            requests[0]
        );
    }

    #[tokio::test]
    async fn fetch_maps_status_errors() {
        let (base, _server) = serve(vec![
            (404, "application/json", br#"{"error": "File not found"}"#.to_vec()),
            (500, "application/json", br#"{"error": "volume offline"}"#.to_vec()),
        ])
        .await;
        let transport = transport(&base);

        assert_eq!(
            transport.fetch("a.pdf").await.unwrap_err(),
            FetchError::NotFound {
                file_name: "a.pdf".into()
            }
        );
        assert_eq!(
            transport.fetch("a.pdf").await.unwrap_err(),
            FetchError::Status {
                status: 500,
                message: "volume offline".into()
            }
        );
    }

    #[tokio::test]
    async fn relevant_page_posts_file_and_query() {
        let (base, server) = serve(vec![(200, "application/json", br#"{"page_num": 7}"#.to_vec())]).await;
        let page = transport(&base)
            .relevant_page("report.pdf", "revenue grew")
            .await
            .unwrap();
        assert_eq!(page, 7);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/files/relevant_page "));
        assert!(requests[0].contains(r#""file_name":"report.pdf""#));
        assert!(requests[0].contains(r#""query":"revenue grew""#));
    }

    #[tokio::test]
    async fn relevant_page_accepts_camel_case_answer() {
        let (base, _server) =
            serve(vec![(200, "application/json", br#"{"pageNumber": 3}"#.to_vec())]).await;
        assert_eq!(
            transport(&base).relevant_page("r.pdf", "q").await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn relevant_page_maps_failures() {
        let (base, _server) = serve(vec![(503, "text/plain", b"maintenance".to_vec())]).await;
        assert_eq!(
            transport(&base).relevant_page("r.pdf", "q").await.unwrap_err(),
            ResolutionError::Status {
                status: 503,
                message: "maintenance".into()
            }
        );
    }

    #[test]
    fn error_bodies_prefer_json_messages() {
        assert_eq!(normalize_err_body(""), "<empty body>");
        assert_eq!(normalize_err_body(r#"{"content": "bad"}"#), "bad");
        assert_eq!(normalize_err_body("plain failure\n"), "plain failure");
    }

    #[test]
    fn rejects_blank_base_url() {
        assert!(HttpTransport::new("  ", Duration::from_secs(1)).is_err());
        assert_eq!(transport("http://h/api/").base_url(), "http://h/api");
    }
}
