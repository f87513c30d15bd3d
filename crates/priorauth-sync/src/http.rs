//! HTTP client for the narrative structuring service.

use futures::stream::{self, StreamExt, TryStreamExt};
use priorauth_core::{NarrativeRequest, NarrativeResponse};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct NarrativeClient {
    client: reqwest::Client,
    base_url: String,
}

impl NarrativeClient {
    /// Create a client for the given service base URL.
    ///
    /// `base_url` should be like `http://localhost:4000`; a trailing slash is
    /// dropped.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/narratives", self.base_url)
    }

    /// Post one batch of requests and return the service's responses.
    pub async fn submit(
        &self,
        requests: &[NarrativeRequest],
    ) -> Result<Vec<NarrativeResponse>, NarrativeError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint();
        info!(url = %url, count = requests.len(), "submitting narrative rules");
        let resp = self.client.post(&url).json(requests).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NarrativeError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        let responses: Vec<NarrativeResponse> = serde_json::from_str(&body)?;
        info!(count = responses.len(), "received narrative responses");
        Ok(responses)
    }

    /// Split `requests` into batches of `batch_size` and keep up to
    /// `concurrency` of them in flight. Responses come back in batch order.
    pub async fn submit_batched(
        &self,
        requests: &[NarrativeRequest],
        batch_size: usize,
        concurrency: usize,
    ) -> Result<Vec<NarrativeResponse>, NarrativeError> {
        let batches: Vec<Vec<NarrativeResponse>> = stream::iter(requests.chunks(batch_size.max(1)))
            .map(|batch| self.submit(batch))
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use priorauth_core::{AuthRequirement, PromptKind, Rule};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(id: &str) -> NarrativeRequest {
        let mut rule = Rule::new("UHC", AuthRequirement::Conditional);
        rule.rule_id = id.into();
        rule.procedure_codes.insert("22630".into());
        rule.narrative_text = Some("Requires documented failure of conservative care".into());
        NarrativeRequest::for_rule(&rule, PromptKind::ClinicalCriteria).unwrap()
    }

    /// Serve `count` requests, answering each with `status` and `body`.
    async fn serve(status: &'static str, body: String, count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..count {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        format!("http://{addr}/")
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    #[test]
    fn narrative_client_trims_trailing_slash() {
        let client = NarrativeClient::new("http://localhost:4000/".into());
        assert_eq!(client.base_url, "http://localhost:4000");
        assert_eq!(client.endpoint(), "http://localhost:4000/api/narratives");
    }

    #[test]
    fn request_json_shape() {
        let json = serde_json::to_value(request("uhc-0001")).unwrap();
        assert_eq!(json["rule_id"], "uhc-0001");
        assert_eq!(json["prompt_kind"], "clinical_criteria");
        assert_eq!(json["procedure_codes"][0], "22630");
    }

    #[test]
    fn response_tolerates_missing_lists() {
        let json = r#"[{"rule_id": "uhc-0001", "age_limits": null, "model": null, "structured_at": null}]"#;
        let parsed: Vec<NarrativeResponse> = serde_json::from_str(json).unwrap();
        assert!(parsed[0].conditions.is_empty());
        assert!(parsed[0].age_limits.is_none());
    }

    #[tokio::test]
    async fn submit_parses_responses() {
        let body = r#"[{"rule_id": "uhc-0001", "conditions": ["Spinal stenosis"], "age_limits": {"min_age": 18, "max_age": null}, "model": "m", "structured_at": null}]"#;
        let url = serve("200 OK", body.to_string(), 1).await;
        let client = NarrativeClient::new(url);
        let responses = client.submit(&[request("uhc-0001")]).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].conditions, ["Spinal stenosis"]);
        assert_eq!(responses[0].age_limits.as_ref().unwrap().min_age, Some(18));
    }

    #[tokio::test]
    async fn server_error_reports_status_and_body() {
        let url = serve("503 Service Unavailable", "\"busy\"".to_string(), 1).await;
        let client = NarrativeClient::new(url);
        let err = client.submit(&[request("uhc-0001")]).await.unwrap_err();
        match err {
            NarrativeError::Server { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "\"busy\"");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_json_error() {
        let url = serve("200 OK", "not json".to_string(), 1).await;
        let client = NarrativeClient::new(url);
        let err = client.submit(&[request("uhc-0001")]).await.unwrap_err();
        assert!(matches!(err, NarrativeError::Json(_)));
    }

    #[tokio::test]
    async fn empty_submit_skips_network() {
        let client = NarrativeClient::new("http://127.0.0.1:9".into());
        assert!(client.submit(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batched_submit_flattens_in_order() {
        let body = r#"[{"rule_id": "x", "age_limits": null, "model": null, "structured_at": null}]"#;
        let url = serve("200 OK", body.to_string(), 2).await;
        let client = NarrativeClient::new(url);
        let requests = [request("a"), request("b"), request("c")];
        let responses = client.submit_batched(&requests, 2, 1).await.unwrap();
        assert_eq!(responses.len(), 2);
    }
}
