use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use ragchat_endpoint::{
    ChatReply, ChatRequest, Endpoint, EndpointError, ErrorKind, HistoryEntry,
    Role, Source,
};
use tokio::time::sleep;

#[derive(Debug)]
struct FakeEndpointError(ErrorKind);

impl Display for FakeEndpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeEndpointError {}

impl EndpointError for FakeEndpointError {
    fn kind(&self) -> ErrorKind {
        self.0
    }

    fn retry_after(&self) -> Option<Duration> {
        match self.0 {
            ErrorKind::Status(429) => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

struct FakeEndpoint;

impl Endpoint for FakeEndpoint {
    type Error = FakeEndpointError;

    fn send(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        let result = 'blk: {
            if req.message.is_empty() {
                break 'blk Err(FakeEndpointError(ErrorKind::Status(400)));
            }
            if req.message == "flood" {
                break 'blk Err(FakeEndpointError(ErrorKind::Status(429)));
            }

            let earlier = req
                .history
                .iter()
                .filter(|entry| entry.role == Role::User)
                .count();
            Ok(ChatReply::with_text(format!(
                "You said {} after {earlier} messages",
                req.message
            ))
            .with_sources([Source {
                id: Some("echo".to_owned()),
                title: None,
                score: Some(1.0),
            }]))
        };
        async move {
            sleep(Duration::from_millis(1)).await;
            result
        }
    }
}

mod tests {
    use super::*;

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_owned(),
            thread_id: "thread:1".to_owned(),
            history: vec![
                HistoryEntry::user("Hello"),
                HistoryEntry::assistant("Hi, how can I help?"),
            ],
            challenge_token: None,
        }
    }

    #[tokio::test]
    async fn test_reply() {
        let endpoint = FakeEndpoint;
        let reply = endpoint.send(&request("Good morning")).await.unwrap();
        assert_eq!(reply.reply, "You said Good morning after 1 messages");
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].label(), "echo");
    }

    #[tokio::test]
    async fn test_error() {
        let endpoint = FakeEndpoint;
        let err = endpoint.send(&request("")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status(400));
        assert_eq!(err.kind().status(), Some(400));
        assert!(err.server_message().is_none());

        let err = endpoint.send(&request("flood")).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_future_outlives_endpoint() {
        let fut = {
            let endpoint = FakeEndpoint;
            endpoint.send(&request("bye"))
        };
        assert!(fut.await.is_ok());
    }

    #[test]
    fn test_history_wire_roles() {
        let json = serde_json::to_value(HistoryEntry::assistant("ok")).unwrap();
        assert_eq!(json["role"], "assistant");
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_send_future_is_send() {
        let endpoint = FakeEndpoint;
        let fut = endpoint.send(&request("x"));
        assert_send(&fut);
    }
}
