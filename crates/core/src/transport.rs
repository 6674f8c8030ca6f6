use std::fmt::{self, Display};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{AbortHandle, Abortable};
use ragchat_endpoint::{
    ChatReply, ChatRequest, Endpoint, EndpointError, ErrorKind, TokenProvider,
};
use tracing::Instrument;

pub(crate) type Ticket = u64;
pub(crate) type DispatchResult = Result<ChatReply, TransportError>;
pub(crate) type BoxedDispatchFuture =
    Pin<Box<dyn Future<Output = DispatchResult> + Send>>;
type HandlerFn = Arc<dyn Fn(ChatRequest) -> BoxedDispatchFuture + Send + Sync>;

/// Why a dispatch attempt didn't produce a reply.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TransportError {
    /// No response was received.
    Network(String),
    /// A non-2xx response.
    HttpStatus { code: u16, body: ErrorBody },
    /// No bot challenge token could be acquired, so nothing was sent.
    Challenge(String),
    /// The attempt was superseded or aborted.
    Cancelled,
}

/// The parts of an error response the coordinator cares about.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ErrorBody {
    pub reply: Option<String>,
    pub retry_after: Option<Duration>,
}

impl TransportError {
    fn from_endpoint<E: EndpointError>(err: &E) -> Self {
        match err.kind() {
            ErrorKind::Network => TransportError::Network(err.to_string()),
            ErrorKind::Status(code) => TransportError::HttpStatus {
                code,
                body: ErrorBody {
                    reply: err.server_message().map(ToOwned::to_owned),
                    retry_after: err.retry_after(),
                },
            },
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(reason) => {
                write!(f, "network failure: {reason}")
            }
            TransportError::HttpStatus { code, .. } => write!(f, "HTTP {code}"),
            TransportError::Challenge(reason) => write!(f, "{reason}"),
            TransportError::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A type-erased wrapper around an endpoint, so that the session doesn't
/// need a generic parameter for it.
#[derive(Clone)]
pub(crate) struct EndpointClient {
    handler_fn: HandlerFn,
}

impl EndpointClient {
    pub fn new<E: Endpoint + 'static>(endpoint: E) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = endpoint.send(&req);
            Box::pin(async move {
                trace!(
                    "sent a request for {} with {} history entries",
                    req.thread_id,
                    req.history.len()
                );
                fut.await.map_err(|err| {
                    debug!("got an error: {err}");
                    TransportError::from_endpoint(&err)
                })
            })
        });
        Self { handler_fn }
    }

    #[inline]
    pub async fn send(&self, req: ChatRequest) -> DispatchResult {
        (self.handler_fn)(req).await
    }
}

struct InFlight {
    ticket: Ticket,
    abort_handle: AbortHandle,
}

/// A cancellable request/response primitive with at most one call in
/// flight.
///
/// Starting a new call aborts the previous one. Callers must check every
/// settlement with [`Transport::settle`] before acting on it: a
/// superseded call may still deliver a result if it finished right
/// before it was aborted.
pub(crate) struct Transport {
    client: EndpointClient,
    token_provider: Option<Arc<dyn TokenProvider>>,
    timeout: Option<Duration>,
    in_flight: Option<InFlight>,
    next_ticket: Ticket,
}

impl Transport {
    pub fn new(
        client: EndpointClient,
        token_provider: Option<Arc<dyn TokenProvider>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            token_provider,
            timeout,
            in_flight: None,
            next_ticket: 1,
        }
    }

    /// Starts a call, cancelling the outstanding one if any.
    ///
    /// The returned future doesn't borrow the transport and is meant to be
    /// spawned.
    pub fn dispatch(
        &mut self,
        mut req: ChatRequest,
    ) -> (Ticket, BoxedDispatchFuture) {
        self.cancel();

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        self.in_flight = Some(InFlight {
            ticket,
            abort_handle,
        });

        let client = self.client.clone();
        let token_provider = self.token_provider.clone();
        let timeout = self.timeout;
        let attempt = async move {
            let _token_guard = match token_provider {
                Some(provider) => {
                    let token = provider.acquire().await;
                    match token {
                        Ok(token) => {
                            req.challenge_token = Some(token);
                            Some(InvalidateOnDrop(provider))
                        }
                        Err(err) => {
                            let reason = err.to_string();
                            return Err(TransportError::Challenge(reason));
                        }
                    }
                }
                None => None,
            };

            match timeout {
                Some(limit) => {
                    tokio::time::timeout(limit, client.send(req))
                        .await
                        .unwrap_or_else(|_| {
                            Err(TransportError::Network(
                                "request timed out".to_owned(),
                            ))
                        })
                }
                None => client.send(req).await,
            }
        };

        // Every call settles, even if the endpoint panics.
        let attempt = AssertUnwindSafe(attempt).catch_unwind().map(|result| {
            result.unwrap_or_else(|_| {
                error!("the endpoint panicked");
                Err(TransportError::Network("the endpoint panicked".to_owned()))
            })
        });
        let fut = Abortable::new(attempt, abort_registration);
        let fut = async move {
            match fut.await {
                Ok(result) => result,
                Err(_aborted) => Err(TransportError::Cancelled),
            }
        }
        .instrument(debug_span!("dispatch", ticket));
        (ticket, Box::pin(fut))
    }

    /// Marks the call identified by `ticket` as settled.
    ///
    /// Returns `false` if the call is no longer the outstanding one, in
    /// which case its result must be discarded.
    pub fn settle(&mut self, ticket: Ticket) -> bool {
        match &self.in_flight {
            Some(in_flight) if in_flight.ticket == ticket => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Aborts the outstanding call, if any.
    pub fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!("aborting call {}", in_flight.ticket);
            in_flight.abort_handle.abort();
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }
}

// The token is single-use, so it is consumed however the attempt ends,
// including when the attempt is aborted.
struct InvalidateOnDrop(Arc<dyn TokenProvider>);

impl Drop for InvalidateOnDrop {
    fn drop(&mut self) {
        self.0.invalidate();
    }
}
