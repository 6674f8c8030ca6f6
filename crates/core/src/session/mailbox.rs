use std::fmt::Debug;

use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use super::SessionClosed;

type MessageSender<S> = mpsc::UnboundedSender<Box<dyn Message<S>>>;

/// A message the session loop handles with exclusive access to `S`.
pub(crate) trait Message<S>: Send + Debug + 'static {
    fn handle(self: Box<Self>, state: &mut S, handle: &Handle<S>);
}

/// A cloneable sender for tasks that report back to the loop.
pub(crate) struct Handle<S> {
    msg_tx: MessageSender<S>,
}

impl<S: 'static> Handle<S> {
    #[inline]
    pub fn send<M: Message<S>>(&self, msg: M) -> Result<(), SessionClosed> {
        self.msg_tx.send(Box::new(msg)).map_err(|_| SessionClosed)
    }
}

impl<S> Clone for Handle<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            msg_tx: self.msg_tx.clone(),
        }
    }
}

/// Owns the loop that processes messages one at a time. Dropping the
/// mailbox stops the loop, which drops the state.
pub(crate) struct Mailbox<S> {
    handle: Handle<S>,
    kill_tx: watch::Sender<bool>,
}

impl<S: Send + 'static> Mailbox<S> {
    /// Spawns the loop. Must be called within a tokio runtime.
    pub fn spawn(state: S) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        tokio::spawn(
            run_loop(msg_tx.downgrade(), state, msg_rx, kill_rx)
                .instrument(debug_span!("session")),
        );
        Self {
            handle: Handle { msg_tx },
            kill_tx,
        }
    }

    #[inline]
    pub fn handle(&self) -> &Handle<S> {
        &self.handle
    }
}

impl<S> Drop for Mailbox<S> {
    fn drop(&mut self) {
        self.kill_tx.send(true).ok();
    }
}

async fn run_loop<S: 'static>(
    msg_tx: mpsc::WeakUnboundedSender<Box<dyn Message<S>>>,
    mut state: S,
    mut msg_rx: mpsc::UnboundedReceiver<Box<dyn Message<S>>>,
    mut kill_rx: watch::Receiver<bool>,
) {
    debug!("started");
    loop {
        let msg = select! {
            biased;

            _ = kill_rx.changed() => {
                break;
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                msg
            }
        };
        trace!("received message: {msg:?}");

        let Some(msg_tx) = msg_tx.upgrade() else {
            warn!("every sender has been dropped, discard the message");
            break;
        };
        let handle = Handle { msg_tx };
        let proc_span = trace_span!("proc msg");
        proc_span.in_scope(|| {
            msg.handle(&mut state, &handle);
            trace!("finished");
        });
    }
    debug!("will terminate");
}
