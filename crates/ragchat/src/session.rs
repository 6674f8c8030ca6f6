use std::path::PathBuf;
use std::sync::Arc;

use ragchat_core::transcript::{Entry, MemoryTranscript, Thread};
use ragchat_core::{
    Policy, Reply, Session as CoreSession,
    SessionBuilder as CoreSessionBuilder, SessionClosed, SessionStatus,
    SubmitError, TurnId,
};
use ragchat_endpoint::{Endpoint, TokenProvider};
use ragchat_http_endpoint::{HttpEndpoint, HttpEndpointConfigBuilder};

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    inner: CoreSessionBuilder,
    threads_file: Option<PathBuf>,
}

impl SessionBuilder {
    /// Creates a session builder that talks to the chat endpoint at `url`
    /// over HTTP.
    pub fn with_endpoint_url<S: Into<String>>(url: S) -> Self {
        let config = HttpEndpointConfigBuilder::with_url(url).build();
        Self::with_endpoint(HttpEndpoint::new(config))
    }

    /// Creates a session builder with a specified endpoint.
    #[inline]
    pub fn with_endpoint<E: Endpoint + 'static>(endpoint: E) -> Self {
        Self {
            inner: CoreSessionBuilder::with_endpoint(endpoint),
            threads_file: None,
        }
    }

    /// Keeps the threads in a JSON file, restoring them on the next start.
    #[inline]
    pub fn with_threads_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.threads_file = Some(path.into());
        self
    }

    /// Replaces the default retry and cooldown policy.
    #[inline]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.inner = self.inner.with_policy(policy);
        self
    }

    /// Sets the provider of bot challenge tokens.
    #[inline]
    pub fn with_token_provider<P: TokenProvider>(mut self, provider: P) -> Self {
        self.inner = self.inner.with_token_provider(provider);
        self
    }

    /// Attaches a callback to be invoked when a reply arrives.
    #[inline]
    pub fn on_reply(
        mut self,
        on_reply: impl Fn(&Reply) + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_reply(on_reply);
        self
    }

    /// Attaches a callback to be invoked when the endpoint rate limits a
    /// message.
    #[inline]
    pub fn on_rate_limited(
        mut self,
        on_rate_limited: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_rate_limited(on_rate_limited);
        self
    }

    /// Attaches a callback to be invoked when a message will be retried.
    #[inline]
    pub fn on_retrying(
        mut self,
        on_retrying: impl Fn(u32, u64) + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_retrying(on_retrying);
        self
    }

    /// Attaches a callback to be invoked when a message fails for good.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_error(on_error);
        self
    }

    /// Attaches a callback to be invoked every second of a cooldown.
    #[inline]
    pub fn on_cooldown_tick(
        mut self,
        on_cooldown_tick: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_cooldown_tick(on_cooldown_tick);
        self
    }

    /// Attaches a callback to be invoked when the session accepts messages
    /// again.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_idle(on_idle);
        self
    }

    /// Builds a new session. The most recent saved thread becomes active,
    /// or a new empty one if there is none.
    pub fn build(self) -> Session {
        let transcript = Arc::new(match self.threads_file {
            Some(path) => MemoryTranscript::open(path),
            None => MemoryTranscript::new(),
        });
        let inner = self.inner.with_transcript(Arc::clone(&transcript)).build();
        let active_thread = match transcript.threads().first() {
            Some(thread) => thread.id().to_owned(),
            None => transcript.new_thread(),
        };
        Session {
            inner,
            transcript,
            active_thread,
        }
    }
}

/// A chat session, like a window that lists threads and has an input box.
///
/// Messages go to the active thread. Switching away from a thread, or
/// deleting it, abandons whatever it still has in flight.
pub struct Session {
    inner: CoreSession,
    transcript: Arc<MemoryTranscript>,
    active_thread: String,
}

impl Session {
    /// Sends a message to the active thread.
    #[inline]
    pub async fn send_message(&self, message: &str) -> Result<TurnId, SubmitError> {
        self.inner.submit(&self.active_thread, message).await
    }

    /// Sends the parked message again.
    #[inline]
    pub async fn resume(&self) -> Result<TurnId, SubmitError> {
        self.inner.resume().await
    }

    /// Aborts the message in flight or cooling down.
    #[inline]
    pub fn cancel(&self) -> Result<(), SessionClosed> {
        self.inner.cancel()
    }

    /// Returns a snapshot of the underlying session.
    #[inline]
    pub async fn status(&self) -> Result<SessionStatus, SessionClosed> {
        self.inner.status().await
    }

    /// Returns the id of the active thread.
    #[inline]
    pub fn active_thread(&self) -> &str {
        &self.active_thread
    }

    /// Returns every thread, most recently created first.
    #[inline]
    pub fn threads(&self) -> Vec<Thread> {
        self.transcript.threads()
    }

    /// Returns the entries of the active thread.
    #[inline]
    pub fn entries(&self) -> Vec<Entry> {
        self.transcript.entries(&self.active_thread)
    }

    /// Creates a thread and makes it active.
    pub fn new_thread(&mut self) -> Result<&str, SessionClosed> {
        let thread_id = self.transcript.new_thread();
        self.activate(thread_id)?;
        Ok(&self.active_thread)
    }

    /// Makes another thread active. Returns `false` if there is no such
    /// thread.
    pub fn switch_thread(&mut self, thread_id: &str) -> Result<bool, SessionClosed> {
        if self.transcript.thread(thread_id).is_none() {
            return Ok(false);
        }
        self.activate(thread_id.to_owned())?;
        Ok(true)
    }

    /// Deletes a thread. If it was the active one, the most recent
    /// remaining thread becomes active, or a new one is created.
    pub fn delete_thread(&mut self, thread_id: &str) -> Result<bool, SessionClosed> {
        self.inner.abandon(thread_id)?;
        if !self.transcript.remove_thread(thread_id) {
            return Ok(false);
        }
        if self.active_thread == thread_id {
            self.active_thread = match self.transcript.threads().first() {
                Some(thread) => thread.id().to_owned(),
                None => self.transcript.new_thread(),
            };
        }
        Ok(true)
    }

    fn activate(&mut self, thread_id: String) -> Result<(), SessionClosed> {
        if thread_id != self.active_thread {
            debug!("switching from {} to {thread_id}", self.active_thread);
            self.inner.abandon(&self.active_thread)?;
            self.active_thread = thread_id;
        }
        Ok(())
    }
}
