use std::sync::Arc;

use ragchat_endpoint::{Endpoint, TokenProvider};

use super::Session;
use super::mailbox::Mailbox;
use super::state::{Callbacks, SessionState};
use crate::policy::Policy;
use crate::session::Reply;
use crate::transcript::{MemoryTranscript, Transcript};
use crate::transport::{EndpointClient, Transport};

/// [`Session`] builder.
pub struct SessionBuilder {
    client: EndpointClient,
    policy: Policy,
    transcript: Option<Arc<dyn Transcript>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    callbacks: Callbacks,
}

impl SessionBuilder {
    /// Creates a new builder with the specified endpoint.
    #[inline]
    pub fn with_endpoint<E: Endpoint + 'static>(endpoint: E) -> Self {
        Self {
            client: EndpointClient::new(endpoint),
            policy: Policy::default(),
            transcript: None,
            token_provider: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Replaces the default [`Policy`].
    #[inline]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the transcript store. Defaults to an empty
    /// [`MemoryTranscript`] private to the session.
    ///
    /// Pass an `Arc` to keep reading the transcript from outside.
    #[inline]
    pub fn with_transcript<T: Transcript + 'static>(
        mut self,
        transcript: T,
    ) -> Self {
        self.transcript = Some(Arc::new(transcript));
        self
    }

    /// Sets the provider of bot challenge tokens. A token is acquired for
    /// every attempt and invalidated once the attempt ends.
    #[inline]
    pub fn with_token_provider<P: TokenProvider>(mut self, provider: P) -> Self {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Attaches a callback to be invoked when a turn gets its reply.
    #[inline]
    pub fn on_reply(
        mut self,
        on_reply: impl Fn(&Reply) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_reply = Some(Box::new(on_reply));
        self
    }

    /// Attaches a callback to be invoked with the cooldown in seconds when
    /// the endpoint rate limits a turn.
    #[inline]
    pub fn on_rate_limited(
        mut self,
        on_rate_limited: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_rate_limited = Some(Box::new(on_rate_limited));
        self
    }

    /// Attaches a callback to be invoked with the retry number and the
    /// cooldown in seconds when a turn will be retried.
    #[inline]
    pub fn on_retrying(
        mut self,
        on_retrying: impl Fn(u32, u64) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_retrying = Some(Box::new(on_retrying));
        self
    }

    /// Attaches a callback to be invoked when a turn fails for good.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_error = Some(Box::new(on_error));
        self
    }

    /// Attaches a callback to be invoked with the remaining seconds every
    /// time the cooldown counts down. The last call reports zero.
    #[inline]
    pub fn on_cooldown_tick(
        mut self,
        on_cooldown_tick: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_cooldown_tick = Some(Box::new(on_cooldown_tick));
        self
    }

    /// Attaches a callback to be invoked when the session is ready for a
    /// new message again.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Builds the session and starts its loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn build(self) -> Session {
        let Self {
            client,
            policy,
            transcript,
            token_provider,
            callbacks,
        } = self;

        let transport =
            Transport::new(client, token_provider, policy.dispatch_timeout);
        let transcript = transcript
            .unwrap_or_else(|| Arc::new(MemoryTranscript::new()));
        let state = SessionState::new(transport, transcript, policy, callbacks);
        Session {
            mailbox: Mailbox::spawn(state),
        }
    }
}
