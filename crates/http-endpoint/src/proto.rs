use std::time::Duration;

use bytes::Bytes;
use mime::Mime;
use ragchat_endpoint::{
    ChatReply, ChatRequest, HistoryEntry, Source, retry_after_from_secs,
};
use serde::Serialize;
use serde_json::{Map, Value};

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChatPayload {
    message: String,
    thread_id: String,
    history: Vec<HistoryEntry>,
    #[serde(rename = "turnstileToken", skip_serializing_if = "Option::is_none")]
    turnstile_token: Option<String>,
}

// -------------------------------
// Bodies received from the server
// -------------------------------

/// The useful parts of a non-2xx body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorBody {
    pub reply: Option<String>,
    pub retry_after: Option<Duration>,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_payload(req: &ChatRequest) -> ChatPayload {
    ChatPayload {
        message: req.message.clone(),
        thread_id: req.thread_id.clone(),
        history: req.history.clone(),
        turnstile_token: req.challenge_token.clone(),
    }
}

/// Parses a 2xx body.
///
/// Anything that isn't a JSON object becomes a malformed reply carrying
/// the raw text, so callers can still show something readable.
pub fn parse_reply(content_type: Option<&str>, body: &Bytes) -> ChatReply {
    let raw = || String::from_utf8_lossy(body).into_owned();

    let declared_json = content_type
        .and_then(|v| v.parse().ok())
        .map(|m: Mime| is_json(&m))
        .unwrap_or(true);
    if !declared_json {
        debug!("unexpected content type: {content_type:?}");
        return ChatReply::malformed(raw());
    }

    let Some(object) = parse_object(body) else {
        debug!("reply body is not a JSON object");
        return ChatReply::malformed(raw());
    };

    let reply = match object.get("reply") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    let sources = match object.get("sources") {
        Some(Value::Array(items)) => {
            items.iter().filter_map(parse_source).collect()
        }
        _ => vec![],
    };

    ChatReply {
        reply,
        sources,
        fallback: None,
    }
}

/// Parses a non-2xx body. Missing or unparsable bodies yield defaults.
pub fn parse_error_body(body: &Bytes) -> ErrorBody {
    let Some(object) = parse_object(body) else {
        return ErrorBody::default();
    };

    let reply = object
        .get("reply")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);
    let retry_after = object
        .get("retry_after")
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .and_then(retry_after_from_secs);

    ErrorBody { reply, retry_after }
}

/// Parses a `Retry-After` header given in delta seconds.
///
/// HTTP dates are not supported and are ignored.
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().and_then(retry_after_from_secs)
}

fn parse_object(body: &Bytes) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn parse_source(value: &Value) -> Option<Source> {
    let object = value.as_object()?;
    let id = object.get("id").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let title = object
        .get("title")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let score = object.get("score").and_then(Value::as_f64);
    Some(Source { id, title, score })
}

#[inline]
fn is_json(m: &Mime) -> bool {
    m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
}
