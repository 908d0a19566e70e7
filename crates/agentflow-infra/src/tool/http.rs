//! HTTP transport for the external tool envelope.
//!
//! `POST {endpoint}` with a JSON `{tool_name, arguments}` body; the reply is
//! a `{result}` or `{error}` envelope. Failures are classified so the
//! invoker knows which ones deserve another attempt.

use std::time::Duration;

use agentflow_core::tool::{ToolTransport, TransportError};
use agentflow_types::tool::{ToolRequest, ToolResponse};

/// [`ToolTransport`] over `reqwest`.
#[derive(Clone)]
pub struct HttpToolTransport {
    client: reqwest::Client,
}

impl HttpToolTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpToolTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a `reqwest` send error.
fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() || e.is_request() {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Fatal(e.to_string())
    }
}

impl ToolTransport for HttpToolTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &ToolRequest,
        timeout: Duration,
    ) -> Result<ToolResponse, TransportError> {
        tracing::debug!(tool = %request.tool_name, endpoint, "sending external tool request");

        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Transient(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Fatal(format!("HTTP {status}: {body}")));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        serde_json::from_slice::<ToolResponse>(&bytes)
            .map_err(|e| TransportError::Fatal(format!("invalid tool response envelope: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response after reading the whole request.
    async fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}/invoke")
    }

    fn request() -> ToolRequest {
        ToolRequest {
            tool_name: "weather".into(),
            arguments: json!({ "city": "Oslo" }),
        }
    }

    #[tokio::test]
    async fn test_result_envelope() {
        let url = serve_once("200 OK", r#"{"result":{"temp":21}}"#, Duration::ZERO).await;
        let resp = HttpToolTransport::new()
            .send(&url, &request(), Duration::from_secs(5))
            .await
            .unwrap();
        match resp {
            ToolResponse::Ok { result } => assert_eq!(result["temp"], 21),
            ToolResponse::Err { error } => panic!("unexpected error envelope: {error}"),
        }
    }

    #[tokio::test]
    async fn test_error_envelope_is_a_successful_round_trip() {
        let url = serve_once("200 OK", r#"{"error":"city unknown"}"#, Duration::ZERO).await;
        let resp = HttpToolTransport::new()
            .send(&url, &request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(resp, ToolResponse::Err { ref error } if error == "city unknown"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let url = serve_once("502 Bad Gateway", "{}", Duration::ZERO).await;
        let err = HttpToolTransport::new()
            .send(&url, &request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Transient(_)));
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let url = serve_once("404 Not Found", "{}", Duration::ZERO).await;
        let err = HttpToolTransport::new()
            .send(&url, &request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_fatal() {
        let url = serve_once("200 OK", r#"{"value":1}"#, Duration::ZERO).await;
        let err = HttpToolTransport::new()
            .send(&url, &request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let url = serve_once("200 OK", r#"{"result":1}"#, Duration::from_secs(3)).await;
        let err = HttpToolTransport::new()
            .send(&url, &request(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpToolTransport::new()
            .send(&format!("http://{addr}/invoke"), &request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
