use std::collections::HashMap;
use std::sync::Arc;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

use super::mailbox::{Handle, Message};
use super::{
    CooldownSnapshot, Reply, SessionStatus, SubmitError, TurnSnapshot,
};
use crate::classify::{Outcome, classify};
use crate::cooldown::{CooldownGate, CooldownReason, Release, TickOutcome};
use crate::policy::{Policy, whole_seconds};
use crate::transcript::{Entry, Transcript};
use crate::transport::{DispatchResult, Ticket, Transport};
use crate::turn::{Turn, TurnId, TurnStatus};

type Callback<A> = Option<Box<dyn Fn(A) + Send + Sync>>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_reply: Option<Box<dyn Fn(&Reply) + Send + Sync>>,
    pub on_rate_limited: Callback<u64>,
    pub on_retrying: Option<Box<dyn Fn(u32, u64) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_cooldown_tick: Callback<u64>,
    pub on_idle: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Everything the session loop owns. Only message handlers touch it.
pub(crate) struct SessionState {
    pub transport: Transport,
    pub transcript: Arc<dyn Transcript>,
    pub policy: Policy,
    pub callbacks: Callbacks,
    /// The turn whose dispatch is outstanding.
    pub current: Option<Turn>,
    /// Holds the retained turn while cooling down.
    pub gate: CooldownGate<Turn>,
    pub parked: Option<Turn>,
    pub ticker: Option<JoinHandle<()>>,
    pub tick_epoch: u64,
    pub retry_backoff: Option<ExponentialBackoff>,
    pub next_turn_id: u64,
    pub running_tasks: HashMap<u64, JoinHandle<()>>,
    pub next_task_id: u64,
}

type StateHandle = Handle<SessionState>;

impl SessionState {
    pub fn new(
        transport: Transport,
        transcript: Arc<dyn Transcript>,
        policy: Policy,
        callbacks: Callbacks,
    ) -> Self {
        Self {
            transport,
            transcript,
            policy,
            callbacks,
            current: None,
            gate: CooldownGate::default(),
            parked: None,
            ticker: None,
            tick_epoch: 0,
            retry_backoff: None,
            next_turn_id: 1,
            running_tasks: HashMap::new(),
            next_task_id: 1,
        }
    }

    fn submit(
        &mut self,
        thread_id: String,
        message: String,
        supersede: bool,
        handle: &StateHandle,
    ) -> Result<TurnId, SubmitError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SubmitError::EmptyMessage);
        }
        if supersede {
            self.cancel_everything();
        } else if self.gate.is_active() {
            return Err(SubmitError::CoolingDown);
        } else if !self.transport.is_idle() {
            return Err(SubmitError::Busy);
        }
        if let Some(parked) = self.parked.take() {
            debug!("discarding parked {}", parked.id);
        }

        // Read the history before recording the message, so that the
        // message itself is never part of its own context.
        let history = self
            .transcript
            .recent_history(&thread_id, self.policy.history_limit);
        self.transcript.append(&thread_id, Entry::user(message));

        let id = TurnId(self.next_turn_id);
        self.next_turn_id += 1;
        let turn = Turn::new(
            id,
            thread_id,
            message.to_owned(),
            history,
            self.policy.history_limit,
        );
        self.retry_backoff = None;
        self.dispatch(turn, handle);
        Ok(id)
    }

    fn resume(&mut self, handle: &StateHandle) -> Result<TurnId, SubmitError> {
        if self.parked.is_none() {
            return Err(SubmitError::NothingToResume);
        }
        if self.gate.is_active() {
            return Err(SubmitError::CoolingDown);
        }
        if !self.transport.is_idle() {
            return Err(SubmitError::Busy);
        }
        let Some(turn) = self.parked.take() else {
            return Err(SubmitError::NothingToResume);
        };
        let id = turn.id;
        self.dispatch(turn, handle);
        Ok(id)
    }

    fn dispatch(&mut self, mut turn: Turn, handle: &StateHandle) {
        debug!("dispatching {} (attempt {})", turn.id, turn.attempt);
        turn.status = TurnStatus::InFlight;
        let (ticket, fut) = self.transport.dispatch(turn.to_request());
        self.current = Some(turn);

        let handle_clone = handle.clone();
        self.spawn_task(
            |_| async move {
                let result = fut.await;
                handle_clone
                    .send(DispatchSettledMessage { ticket, result })
                    .ok();
            },
            handle,
        );
    }

    fn dispatch_settled(
        &mut self,
        ticket: Ticket,
        result: DispatchResult,
        handle: &StateHandle,
    ) {
        if !self.transport.settle(ticket) {
            trace!("discarding the result of superseded call {ticket}");
            return;
        }
        let Some(mut turn) = self.current.take() else {
            warn!("call {ticket} settled without a turn");
            return;
        };

        match classify(result, &self.policy) {
            Outcome::Replied { content, sources } => {
                turn.status = TurnStatus::Succeeded;
                self.transcript.append(
                    &turn.thread_id,
                    Entry::assistant(content.clone(), sources.clone()),
                );
                info!("{} succeeded after {} retries", turn.id, turn.attempt);
                if let Some(on_reply) = &self.callbacks.on_reply {
                    on_reply(&Reply {
                        turn_id: turn.id,
                        thread_id: turn.thread_id,
                        content,
                        sources,
                    });
                }
                self.notify_idle();
            }
            Outcome::RateLimited(seconds) => {
                turn.status = TurnStatus::RateLimited;
                info!("{} rate limited for {seconds}s", turn.id);
                self.engage(CooldownReason::RateLimit, seconds, turn, handle);
                if let Some(on_rate_limited) = &self.callbacks.on_rate_limited {
                    on_rate_limited(seconds);
                }
            }
            Outcome::Transient(message)
                if turn.attempt < self.policy.max_retries =>
            {
                turn.attempt += 1;
                turn.status = TurnStatus::Retrying;
                let attempt = turn.attempt;
                let seconds = self.next_retry_delay();
                info!(
                    "{} failed ({message}), retry {attempt} in {seconds}s",
                    turn.id
                );
                self.engage(
                    CooldownReason::TransientError,
                    seconds,
                    turn,
                    handle,
                );
                if let Some(on_retrying) = &self.callbacks.on_retrying {
                    on_retrying(attempt, seconds);
                }
            }
            Outcome::Transient(message) | Outcome::Terminal(message) => {
                self.fail(turn, message);
            }
            Outcome::Cancelled => {
                debug!("{} was cancelled", turn.id);
                self.notify_idle();
            }
        }
    }

    fn fail(&mut self, mut turn: Turn, message: String) {
        turn.status = TurnStatus::Failed;
        warn!("{} failed: {message}", turn.id);
        self.transcript
            .append(&turn.thread_id, Entry::error(message.clone()));
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(&message);
        }
        self.notify_idle();
    }

    fn next_retry_delay(&mut self) -> u64 {
        let policy = &self.policy;
        let delay = self
            .retry_backoff
            .get_or_insert_with(|| policy.transient_backoff())
            .next_backoff()
            .unwrap_or(policy.transient_delay);
        whole_seconds(delay)
    }

    fn engage(
        &mut self,
        reason: CooldownReason,
        seconds: u64,
        turn: Turn,
        handle: &StateHandle,
    ) {
        let auto_resume = self.policy.auto_resume;
        if let Some(replaced) =
            self.gate.engage(reason, seconds, Some(turn), auto_resume)
        {
            debug!("cooldown for {} was replaced", replaced.id);
        }
        self.start_ticker(handle);
    }

    fn start_ticker(&mut self, handle: &StateHandle) {
        self.stop_ticker();
        self.tick_epoch += 1;

        let epoch = self.tick_epoch;
        let period = self.policy.tick_interval;
        let handle = handle.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if handle.send(TickMessage(epoch)).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn tick(&mut self, epoch: u64, handle: &StateHandle) {
        if epoch != self.tick_epoch {
            trace!("discarding stale tick {epoch}");
            return;
        }
        match self.gate.tick() {
            TickOutcome::Idle => self.stop_ticker(),
            TickOutcome::Counting(remaining) => {
                self.emit_cooldown_tick(remaining);
            }
            TickOutcome::Expired(release) => {
                self.stop_ticker();
                self.emit_cooldown_tick(0);
                match release {
                    Release::Resend(turn) => self.dispatch(turn, handle),
                    Release::Park(mut turn) => {
                        debug!("parking {}", turn.id);
                        turn.status = TurnStatus::Pending;
                        self.parked = Some(turn);
                        self.notify_idle();
                    }
                    Release::Nothing => self.notify_idle(),
                }
            }
        }
    }

    #[inline]
    fn emit_cooldown_tick(&self, remaining: u64) {
        if let Some(on_cooldown_tick) = &self.callbacks.on_cooldown_tick {
            on_cooldown_tick(remaining);
        }
    }

    fn abandon(&mut self, thread_id: &str) {
        let mut cancelled = false;
        if self
            .current
            .as_ref()
            .is_some_and(|turn| turn.thread_id == thread_id)
        {
            self.transport.cancel();
            self.current = None;
            cancelled = true;
        }
        if self
            .gate
            .payload()
            .is_some_and(|turn| turn.thread_id == thread_id)
        {
            self.gate.cancel();
            self.stop_ticker();
            cancelled = true;
        }
        if self
            .parked
            .as_ref()
            .is_some_and(|turn| turn.thread_id == thread_id)
        {
            self.parked = None;
        }

        if cancelled {
            debug!("abandoned {thread_id}");
            self.notify_idle();
        }
    }

    fn cancel(&mut self) {
        let busy = self.current.is_some() || self.gate.is_active();
        self.cancel_everything();
        if busy {
            self.notify_idle();
        }
    }

    fn cancel_everything(&mut self) {
        self.transport.cancel();
        if let Some(turn) = self.current.take() {
            debug!("cancelled {}", turn.id);
        }
        if let Some(turn) = self.gate.cancel() {
            debug!("cancelled the cooldown of {}", turn.id);
        }
        self.stop_ticker();
        self.parked = None;
    }

    fn status(&self) -> SessionStatus {
        let turn = self
            .current
            .as_ref()
            .or_else(|| self.gate.payload())
            .map(|turn| TurnSnapshot {
                id: turn.id,
                thread_id: turn.thread_id.clone(),
                attempt: turn.attempt,
                status: turn.status,
            });
        let cooldown = self.gate.reason().map(|reason| CooldownSnapshot {
            reason,
            remaining_seconds: self.gate.remaining_seconds(),
        });
        SessionStatus {
            turn,
            cooldown,
            parked: self.parked.as_ref().map(|turn| turn.id),
        }
    }

    /// Invokes the idle callback if a new turn could be submitted now.
    fn notify_idle(&self) {
        if self.current.is_some() || self.gate.is_active() {
            return;
        }
        if let Some(on_idle) = &self.callbacks.on_idle {
            on_idle();
        }
    }

    fn spawn_task<F, Fut>(&mut self, f: F, handle: &StateHandle)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let handle = handle.clone();
        let fut = f(task_id);
        let task = tokio::spawn(async move {
            fut.await;
            handle.send(TaskEndedMessage(task_id)).ok();
        });
        self.running_tasks.insert(task_id, task);
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.transport.cancel();
        self.stop_ticker();
        for (_, task) in self.running_tasks.drain() {
            task.abort();
        }
    }
}

#[derive(Debug)]
pub(crate) struct SubmitMessage {
    pub thread_id: String,
    pub message: String,
    pub supersede: bool,
    pub reply_tx: oneshot::Sender<Result<TurnId, SubmitError>>,
}

impl Message<SessionState> for SubmitMessage {
    fn handle(self: Box<Self>, state: &mut SessionState, handle: &StateHandle) {
        let Self {
            thread_id,
            message,
            supersede,
            reply_tx,
        } = *self;
        let res = state.submit(thread_id, message, supersede, handle);
        reply_tx.send(res).ok();
    }
}

#[derive(Debug)]
pub(crate) struct ResumeMessage(pub oneshot::Sender<Result<TurnId, SubmitError>>);

impl Message<SessionState> for ResumeMessage {
    fn handle(self: Box<Self>, state: &mut SessionState, handle: &StateHandle) {
        let res = state.resume(handle);
        self.0.send(res).ok();
    }
}

#[derive(Debug)]
pub(crate) struct AbandonMessage(pub String);

impl Message<SessionState> for AbandonMessage {
    #[inline]
    fn handle(self: Box<Self>, state: &mut SessionState, _handle: &StateHandle) {
        state.abandon(&self.0);
    }
}

#[derive(Debug)]
pub(crate) struct CancelMessage;

impl Message<SessionState> for CancelMessage {
    #[inline]
    fn handle(self: Box<Self>, state: &mut SessionState, _handle: &StateHandle) {
        state.cancel();
    }
}

#[derive(Debug)]
pub(crate) struct StatusMessage(pub oneshot::Sender<SessionStatus>);

impl Message<SessionState> for StatusMessage {
    #[inline]
    fn handle(self: Box<Self>, state: &mut SessionState, _handle: &StateHandle) {
        self.0.send(state.status()).ok();
    }
}

#[derive(Debug)]
struct DispatchSettledMessage {
    ticket: Ticket,
    result: DispatchResult,
}

impl Message<SessionState> for DispatchSettledMessage {
    #[inline]
    fn handle(self: Box<Self>, state: &mut SessionState, handle: &StateHandle) {
        state.dispatch_settled(self.ticket, self.result, handle);
    }
}

#[derive(Debug)]
struct TickMessage(u64);

impl Message<SessionState> for TickMessage {
    #[inline]
    fn handle(self: Box<Self>, state: &mut SessionState, handle: &StateHandle) {
        state.tick(self.0, handle);
    }
}

#[derive(Debug)]
struct TaskEndedMessage(u64);

impl Message<SessionState> for TaskEndedMessage {
    #[inline]
    fn handle(self: Box<Self>, state: &mut SessionState, _handle: &StateHandle) {
        state
            .running_tasks
            .remove(&self.0)
            .expect("internal state is inconsistent");
    }
}
