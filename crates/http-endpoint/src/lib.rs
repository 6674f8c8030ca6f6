//! A chat endpoint for JSON-over-HTTP retrieval-augmented chat services.

#[macro_use]
extern crate tracing;

mod config;
mod proto;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ragchat_endpoint::{
    ChatReply, ChatRequest, Endpoint, EndpointError, ErrorKind,
};
use reqwest::{Client, header};

pub use config::{HttpEndpointConfig, HttpEndpointConfigBuilder};

/// Error type for [`HttpEndpoint`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    server_message: Option<String>,
    retry_after: Option<Duration>,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            server_message: None,
            retry_after: None,
        }
    }

    fn from_status(
        code: u16,
        body: proto::ErrorBody,
        retry_after_header: Option<Duration>,
    ) -> Self {
        let kind = ErrorKind::Status(code);
        Self {
            message: body.reply.clone().unwrap_or_else(|| kind.to_string()),
            kind,
            server_message: body.reply,
            retry_after: body.retry_after.or(retry_after_header),
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl EndpointError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    fn server_message(&self) -> Option<&str> {
        self.server_message.as_deref()
    }

    #[inline]
    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Chat endpoint reached with a JSON `POST` request.
#[derive(Clone, Debug)]
pub struct HttpEndpoint {
    client: Client,
    config: Arc<HttpEndpointConfig>,
}

impl HttpEndpoint {
    /// Creates a new `HttpEndpoint` with the given configuration.
    #[inline]
    pub fn new(config: HttpEndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl Endpoint for HttpEndpoint {
    type Error = Error;

    fn send(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        let payload = proto::create_payload(req);
        let mut builder = self
            .client
            .post(&self.config.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, &self.config.user_agent);
        for (name, value) in &self.config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp_fut = builder.json(&payload).send();

        async move {
            let resp = match resp_fut.await {
                Ok(resp) => resp,
                Err(err) => {
                    return Err(Error::new(format!("{err}"), ErrorKind::Network));
                }
            };

            let status = resp.status();
            let headers = resp.headers();
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned);
            let retry_after = headers
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(proto::parse_retry_after_header);
            trace!("got a response: {status}, content type {content_type:?}");

            let body = match resp.bytes().await {
                Ok(body) => body,
                // Error statuses are reported even if the body is lost.
                Err(err) if !status.is_success() => {
                    debug!("failed to read error body: {err}");
                    Bytes::new()
                }
                Err(err) => {
                    return Err(Error::new(format!("{err}"), ErrorKind::Network));
                }
            };

            if !status.is_success() {
                let body = proto::parse_error_body(&body);
                return Err(Error::from_status(
                    status.as_u16(),
                    body,
                    retry_after,
                ));
            }

            Ok(proto::parse_reply(content_type.as_deref(), &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use ragchat_endpoint::MAX_RETRY_AFTER;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_owned(),
            thread_id: "thread:1".to_owned(),
            history: vec![],
            challenge_token: Some("token:1".to_owned()),
        }
    }

    fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut resp = format!("HTTP/1.1 {status}\r\n");
        for (name, value) in headers {
            resp.push_str(&format!("{name}: {value}\r\n"));
        }
        resp.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        resp
    }

    /// Serves one canned response on a local port. The handle yields the
    /// body of the request it received.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/chat", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0; 1024];
            let body_start = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the headers ended");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) =
                    buf.windows(4).position(|w| w == b"\r\n\r\n")
                {
                    break pos + 4;
                }
            };
            let head =
                String::from_utf8_lossy(&buf[..body_start]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < body_start + body_len {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the body ended");
                buf.extend_from_slice(&chunk[..n]);
            }

            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8(buf[body_start..body_start + body_len].to_vec())
                .unwrap()
        });
        (url, server)
    }

    fn endpoint(url: String) -> HttpEndpoint {
        HttpEndpoint::new(HttpEndpointConfigBuilder::with_url(url).build())
    }

    #[tokio::test]
    async fn test_reply_over_http() {
        let (url, server) = serve_once(response(
            "200 OK",
            &[("Content-Type", "application/json; charset=utf-8")],
            r#"{"reply":"At nine.","sources":[{"id":"hours","score":0.8}]}"#,
        ))
        .await;

        let reply = endpoint(url).send(&request("When?")).await.unwrap();
        assert_eq!(reply.reply, "At nine.");
        assert_eq!(reply.sources.len(), 1);
        assert!(!reply.is_malformed());

        let payload: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(payload["message"], "When?");
        assert_eq!(payload["thread_id"], "thread:1");
        assert_eq!(payload["turnstileToken"], "token:1");
    }

    #[tokio::test]
    async fn test_rate_limited_over_http() {
        let (url, server) = serve_once(response(
            "429 Too Many Requests",
            &[("Content-Type", "application/json"), ("Retry-After", "7")],
            r#"{"reply":"Slow down"}"#,
        ))
        .await;

        let err = endpoint(url).send(&request("Hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.server_message(), Some("Slow down"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_huge_retry_after_over_http() {
        let (url, server) = serve_once(response(
            "429 Too Many Requests",
            &[("Content-Type", "application/json")],
            r#"{"retry_after":1e30}"#,
        ))
        .await;

        let err = endpoint(url).send(&request("Hi")).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(MAX_RETRY_AFTER));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_html_success_is_malformed() {
        let (url, server) = serve_once(response(
            "200 OK",
            &[("Content-Type", "text/html")],
            "<h1>Maintenance</h1>",
        ))
        .await;

        let reply = endpoint(url).send(&request("Hi")).await.unwrap();
        assert!(reply.is_malformed());
        assert_eq!(reply.fallback.as_deref(), Some("<h1>Maintenance</h1>"));
        server.await.unwrap();
    }

    #[test]
    fn test_error_from_status() {
        let err = Error::from_status(
            429,
            proto::ErrorBody {
                reply: Some("Slow down.".to_owned()),
                retry_after: None,
            },
            Some(Duration::from_secs(9)),
        );
        assert_eq!(err.kind(), ErrorKind::Status(429));
        assert_eq!(err.server_message(), Some("Slow down."));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(9)));
        assert_eq!(err.to_string(), "Slow down.");

        let err = Error::from_status(
            503,
            proto::ErrorBody {
                reply: None,
                retry_after: Some(Duration::from_secs(2)),
            },
            Some(Duration::from_secs(9)),
        );
        assert_eq!(err.server_message(), None);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(err.message(), "HTTP 503");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_failure() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let config =
            HttpEndpointConfigBuilder::with_url("http://127.0.0.1:9/chat")
                .build();
        let endpoint = HttpEndpoint::new(config);
        let req = ChatRequest {
            message: "Hi".to_owned(),
            thread_id: "thread:1".to_owned(),
            history: vec![],
            challenge_token: None,
        };
        let err = endpoint.send(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
