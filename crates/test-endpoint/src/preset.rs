use std::time::Duration;

use ragchat_endpoint::{ChatReply, Source};
use serde::{Deserialize, Serialize};

/// How the endpoint settles one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetOutcome {
    #[serde(rename = "reply")]
    Reply(ChatReply),
    #[serde(rename = "status")]
    Status {
        code: u16,
        reply: Option<String>,
        retry_after: Option<f64>,
    },
    #[serde(rename = "network_failure")]
    NetworkFailure,
    /// The endpoint future panics instead of settling.
    #[serde(rename = "panic")]
    Panic,
}

/// One scripted response. Steps are consumed in request order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetStep {
    /// The outcome of the request.
    pub outcome: PresetOutcome,
    /// How long the request takes to settle. Falls back to the endpoint
    /// delay when unset.
    pub delay: Option<Duration>,
}

impl PresetStep {
    /// A successful reply with the given text.
    #[inline]
    pub fn reply<S: Into<String>>(text: S) -> Self {
        Self::with_outcome(PresetOutcome::Reply(ChatReply::with_text(text)))
    }

    /// A successful reply with the given text and sources.
    #[inline]
    pub fn reply_with_sources<S: Into<String>>(
        text: S,
        sources: impl Into<Vec<Source>>,
    ) -> Self {
        Self::with_outcome(PresetOutcome::Reply(
            ChatReply::with_text(text).with_sources(sources),
        ))
    }

    /// A 2xx response whose body doesn't parse.
    #[inline]
    pub fn malformed<S: Into<String>>(raw: S) -> Self {
        Self::with_outcome(PresetOutcome::Reply(ChatReply::malformed(raw)))
    }

    /// A non-2xx response without a body.
    #[inline]
    pub fn status(code: u16) -> Self {
        Self::with_outcome(PresetOutcome::Status {
            code,
            reply: None,
            retry_after: None,
        })
    }

    /// A 429 response asking to wait `seconds`.
    #[inline]
    pub fn rate_limited(seconds: f64) -> Self {
        Self::with_outcome(PresetOutcome::Status {
            code: 429,
            reply: None,
            retry_after: Some(seconds),
        })
    }

    /// A request that never got a response.
    #[inline]
    pub fn network_failure() -> Self {
        Self::with_outcome(PresetOutcome::NetworkFailure)
    }

    /// An endpoint that panics while the request is in flight.
    #[inline]
    pub fn panic() -> Self {
        Self::with_outcome(PresetOutcome::Panic)
    }

    /// Attaches a server message to a status response.
    #[inline]
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        if let PresetOutcome::Status { reply, .. } = &mut self.outcome {
            *reply = Some(message.into());
        }
        self
    }

    /// Sets how long the request takes to settle.
    #[inline]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[inline]
    fn with_outcome(outcome: PresetOutcome) -> Self {
        Self {
            outcome,
            delay: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let steps = vec![
            PresetStep::rate_limited(3.0).with_message("Slow down"),
            PresetStep::reply_with_sources(
                "The library opens at 9.",
                [Source {
                    id: Some("hours.md".to_string()),
                    title: Some("Opening hours".to_string()),
                    score: Some(0.75),
                }],
            )
            .with_delay(Duration::from_millis(20)),
            PresetStep::network_failure(),
            PresetStep::panic(),
        ];

        let serialized = serde_json::to_string(&steps).unwrap();
        let deserialized: Vec<PresetStep> =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(steps, deserialized);
    }

    #[test]
    fn test_with_message_ignored_for_replies() {
        let step = PresetStep::reply("ok").with_message("ignored");
        assert_eq!(step, PresetStep::reply("ok"));
    }
}
