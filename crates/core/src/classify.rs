use ragchat_endpoint::{ChatReply, MAX_RETRY_AFTER, Source};

use crate::policy::Policy;
use crate::transport::{DispatchResult, TransportError};

const RATE_LIMITED: u16 = 429;

/// What the coordinator should do with a settled dispatch attempt.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outcome {
    /// Record the reply. `content` is trimmed and never empty.
    Replied {
        content: String,
        sources: Vec<Source>,
    },
    /// Cool down for the given whole seconds, then resend. Doesn't count
    /// against the retry budget.
    RateLimited(u64),
    /// Retry if the budget allows, otherwise fail with the message.
    Transient(String),
    /// Drop silently.
    Cancelled,
    /// Fail with the message.
    Terminal(String),
}

pub(crate) fn classify(result: DispatchResult, policy: &Policy) -> Outcome {
    let err = match result {
        Ok(reply) => return classify_reply(reply, policy),
        Err(err) => err,
    };

    match err {
        TransportError::HttpStatus { code, body } if code == RATE_LIMITED => {
            let wait = body
                .retry_after
                .unwrap_or(policy.default_rate_limit_wait)
                .min(MAX_RETRY_AFTER);
            let seconds = wait.as_secs_f64().ceil() as u64;
            Outcome::RateLimited(seconds.max(1))
        }
        TransportError::HttpStatus { code, body }
            if policy.is_transient_status(code) =>
        {
            Outcome::Transient(server_or_generic(body.reply, policy))
        }
        TransportError::HttpStatus { body, .. } => {
            Outcome::Terminal(server_or_generic(body.reply, policy))
        }
        TransportError::Network(reason) => {
            Outcome::Transient(with_reason(&policy.generic_error, &reason))
        }
        TransportError::Challenge(reason) => Outcome::Terminal(reason),
        TransportError::Cancelled => Outcome::Cancelled,
    }
}

fn classify_reply(reply: ChatReply, policy: &Policy) -> Outcome {
    let ChatReply {
        reply,
        sources,
        fallback,
    } = reply;

    if let Some(raw) = fallback {
        return Outcome::Terminal(server_or_generic(Some(raw), policy));
    }

    let content = reply.trim();
    let content = if content.is_empty() {
        policy.empty_reply_placeholder.clone()
    } else {
        content.to_owned()
    };
    Outcome::Replied { content, sources }
}

// Keeps the low-level reason visible so a network failure can be told
// apart from a server error.
#[inline]
fn with_reason(message: &str, reason: &str) -> String {
    let reason = reason.trim();
    if reason.is_empty() {
        message.to_owned()
    } else {
        format!("{message} ({reason})")
    }
}

#[inline]
fn server_or_generic(message: Option<String>, policy: &Policy) -> String {
    message
        .map(|m| m.trim().to_owned())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| policy.generic_error.clone())
}
