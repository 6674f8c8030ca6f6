//! A local fake chat endpoint for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ragchat_endpoint::{
    ChatReply, ChatRequest, Endpoint, EndpointError, ErrorKind, TokenError,
    TokenProvider, retry_after_from_secs,
};
use tokio::time::sleep;

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    server_message: Option<String>,
    retry_after: Option<Duration>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
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

impl PresetOutcome {
    fn into_result(self) -> Result<ChatReply, Error> {
        match self {
            PresetOutcome::Reply(reply) => Ok(reply),
            PresetOutcome::Status {
                code,
                reply,
                retry_after,
            } => Err(Error {
                message: format!("HTTP {code}"),
                kind: ErrorKind::Status(code),
                server_message: reply,
                retry_after: retry_after.and_then(retry_after_from_secs),
            }),
            PresetOutcome::NetworkFailure => Err(Error {
                message: "connection reset".to_owned(),
                kind: ErrorKind::Network,
                server_message: None,
                retry_after: None,
            }),

            PresetOutcome::Panic => panic!("the endpoint blew up"),
        }
    }
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<PresetStep>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Mutex<Option<Duration>>,
}

/// A local fake chat endpoint for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// endpoint should respond to each request. Steps are consumed in the order
/// requests arrive, no matter what the request contains. If there are no
/// enough steps in the script, a 500 error is returned.
///
/// Clones share the same script and request log, so a test can keep one
/// clone for assertions after handing another one to the session.
///
/// # Note
///
/// This type is not optimized for production use. You should only use it
/// for testing.
#[derive(Clone, Default)]
pub struct TestEndpoint {
    script: Arc<Script>,
}

impl TestEndpoint {
    #[inline]
    pub fn add_step(&self, step: PresetStep) {
        self.script.steps.lock().unwrap().push_back(step);
    }

    #[inline]
    pub fn add_steps(&self, steps: impl IntoIterator<Item = PresetStep>) {
        self.script.steps.lock().unwrap().extend(steps);
    }

    /// Sets the default delay for steps without their own delay.
    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        *self.script.delay.lock().unwrap() = Some(duration);
    }

    /// Returns every request received so far, in order.
    #[inline]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.script.requests.lock().unwrap().clone()
    }

    #[inline]
    pub fn request_count(&self) -> usize {
        self.script.requests.lock().unwrap().len()
    }

    #[inline]
    pub fn remaining_steps(&self) -> usize {
        self.script.steps.lock().unwrap().len()
    }
}

impl Endpoint for TestEndpoint {
    type Error = crate::Error;

    fn send(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        self.script.requests.lock().unwrap().push(req.clone());
        let step = self.script.steps.lock().unwrap().pop_front();
        let default_delay = *self.script.delay.lock().unwrap();

        let (outcome, delay) = match step {
            Some(step) => (Some(step.outcome), step.delay.or(default_delay)),
            None => (None, default_delay),
        };
        let delay = delay.unwrap_or(Duration::from_millis(1));

        async move {
            sleep(delay).await;
            match outcome {
                Some(outcome) => outcome.into_result(),
                None => Err(Error {
                    message: "no enough steps".to_owned(),
                    kind: ErrorKind::Status(500),
                    server_message: Some("no enough steps".to_owned()),
                    retry_after: None,
                }),
            }
        }
    }
}

/// A fake bot challenge that hands out numbered tokens.
#[derive(Clone, Default)]
pub struct TestTokenProvider {
    acquired: Arc<AtomicUsize>,
    invalidated: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl TestTokenProvider {
    /// Makes subsequent `acquire` calls fail (or succeed again).
    #[inline]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[inline]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn invalidated(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for TestTokenProvider {
    async fn acquire(&self) -> Result<String, TokenError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TokenError::new("challenge not completed"));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token:{n}"))
    }

    fn invalidate(&self) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}
