/// Message wire types shared by the message source, the store and the builder
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// WebRTC signaling exchange (call/connection invitations)
pub const SIGNAL_SDP_TYPE: &str = "https://didcomm.org/webrtc/1.0/sdp";
/// Relay registration handshake, never shown to the user
pub const RELAY_REGISTRATION_TYPE: &str = "https://impervious.ai/didcomm/relay-registration/1.0";
/// Plain text message
pub const BASIC_MESSAGE_TYPE: &str = "https://didcomm.org/basicmessage/2.0/message";

/// Raw message record as returned by the messaging daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Serialized payload; usually a JSON string, occasionally an inline object
    pub data: Value,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Local user's identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// An empty id is treated the same as no identity at all
    pub fn is_resolved(&self) -> bool {
        !self.id.is_empty()
    }
}

impl Message {
    /// Compose a new text message from `from` to `to`
    pub fn compose(from: &str, to: &str, text: &str, group_id: Option<String>) -> Self {
        let data = serde_json::json!({
            "from": from,
            "created_time": chrono::Utc::now().timestamp(),
            "body": { "content": { "text": text } },
        });
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: BASIC_MESSAGE_TYPE.to_string(),
            data: Value::String(data.to_string()),
            recipients: vec![to.to_string(), from.to_string()],
            group_id,
        }
    }

    pub fn is_signal(&self) -> bool {
        self.kind == SIGNAL_SDP_TYPE
    }

    pub fn is_relay_registration(&self) -> bool {
        self.kind == RELAY_REGISTRATION_TYPE
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Why a message payload was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("payload field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Offer/answer marker of a signaling exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SignalType {
    Offer,
    Answer,
    Other(String),
}

impl SignalType {
    fn from_raw(raw: &str) -> Self {
        match raw {
            "offer" => SignalType::Offer,
            "answer" => SignalType::Answer,
            other => SignalType::Other(other.to_string()),
        }
    }
}

/// Parsed and validated message payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub from: String,
    pub created_time: CreatedTime,
    #[serde(skip)]
    pub signal: Option<SignalType>,
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Remaining payload fields (`body`, `to`, ...), kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// Parse a message's `data`. Only `from` and `created_time` are required;
    /// a missing `body.content.signal` chain just means "no signal".
    pub fn parse(message: &Message) -> std::result::Result<Self, PayloadError> {
        let value = match &message.data {
            Value::String(raw) => serde_json::from_str::<Value>(raw)
                .map_err(|e| PayloadError::NotJson(e.to_string()))?,
            other => other.clone(),
        };
        let Value::Object(mut extra) = value else {
            return Err(PayloadError::NotAnObject);
        };

        let from = match extra.remove("from") {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(PayloadError::InvalidField {
                    field: "from",
                    reason: format!("expected a string, got {}", other),
                })
            }
            None => return Err(PayloadError::MissingField("from")),
        };

        let created_time = match extra.remove("created_time") {
            Some(raw) => parse_created_time(&raw)?,
            None => return Err(PayloadError::MissingField("created_time")),
        };

        let signal = extra
            .get("body")
            .and_then(|b| b.get("content"))
            .and_then(|c| c.get("signal"))
            .and_then(|s| s.get("type"))
            .and_then(Value::as_str)
            .map(SignalType::from_raw);

        // A stale groupId inside the payload is replaced by the record's own
        extra.remove("groupId");

        Ok(Self {
            from,
            created_time,
            signal,
            group_id: None,
            extra,
        })
    }

    /// Strip routing data from `from` and attach the record's group id
    pub fn normalized(mut self, group_id: Option<String>) -> Self {
        if let Some(idx) = self.from.find('?') {
            self.from.truncate(idx);
        }
        self.group_id = group_id;
        self
    }

    pub fn is_answer(&self) -> bool {
        self.signal == Some(SignalType::Answer)
    }
}

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Message creation time, Unix nanoseconds. Integer inputs are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CreatedTime(i128);

impl CreatedTime {
    pub fn from_secs(secs: i64) -> Self {
        Self(i128::from(secs) * NANOS_PER_SEC)
    }

    /// `None` for NaN or infinity
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.trunc() as i128;
        let frac = (secs.fract() * 1e9).round() as i128;
        Some(Self(whole.saturating_mul(NANOS_PER_SEC).saturating_add(frac)))
    }

    pub fn from_datetime<Tz: chrono::TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self(i128::from(dt.timestamp()) * NANOS_PER_SEC + i128::from(dt.timestamp_subsec_nanos()))
    }

    pub fn as_nanos(&self) -> i128 {
        self.0
    }

    /// Whole seconds, if there is no sub-second part
    pub fn whole_secs(&self) -> Option<i64> {
        if self.0 % NANOS_PER_SEC == 0 {
            i64::try_from(self.0 / NANOS_PER_SEC).ok()
        } else {
            None
        }
    }

    fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.0.div_euclid(NANOS_PER_SEC)).ok()?;
        let nanos = u32::try_from(self.0.rem_euclid(NANOS_PER_SEC)).ok()?;
        DateTime::<Utc>::from_timestamp(secs, nanos)
    }
}

/// Whole seconds print as an integer, anything finer as RFC 3339
impl fmt::Display for CreatedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(secs) = self.whole_secs() {
            return write!(f, "{}", secs);
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => write!(f, "{}ns", self.0),
        }
    }
}

impl Serialize for CreatedTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.whole_secs() {
            Some(secs) => serializer.serialize_i64(secs),
            None => serializer.collect_str(self),
        }
    }
}

fn parse_created_time(raw: &Value) -> std::result::Result<CreatedTime, PayloadError> {
    let invalid = |reason: String| PayloadError::InvalidField {
        field: "created_time",
        reason,
    };

    match raw {
        Value::Number(n) => n
            .as_i64()
            .map(CreatedTime::from_secs)
            .or_else(|| n.as_f64().and_then(CreatedTime::from_secs_f64))
            .ok_or_else(|| invalid(format!("{} is out of range", n))),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(secs) = trimmed.parse::<i64>() {
                return Ok(CreatedTime::from_secs(secs));
            }
            if let Some(t) = trimmed.parse::<f64>().ok().and_then(CreatedTime::from_secs_f64) {
                return Ok(t);
            }
            DateTime::parse_from_rfc3339(trimmed)
                .map(|dt| CreatedTime::from_datetime(&dt))
                .map_err(|e| invalid(format!("{:?}: {}", s, e)))
        }
        other => Err(invalid(format!("unsupported value {}", other))),
    }
}

/// Message with its payload parsed and normalized, as handed to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Payload,
    pub recipients: Vec<String>,
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl NormalizedMessage {
    pub fn new(message: &Message, payload: Payload) -> Self {
        Self {
            id: message.id.clone(),
            kind: message.kind.clone(),
            data: payload.normalized(message.group_id.clone()),
            recipients: message.recipients.clone(),
            group_id: message.group_id.clone(),
        }
    }
}

/// Body returned by the message fetch endpoint. Some daemon builds wrap the
/// list as `{ "data": { "messages": [...] } }`, others return it bare.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchResponse {
    // Bare first: a struct variant would also accept a one-element array
    Bare(Vec<Message>),
    Wrapped { data: FetchData },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchData {
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
}

impl FetchResponse {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            FetchResponse::Bare(messages) => messages,
            FetchResponse::Wrapped { data } => data.messages.unwrap_or_default(),
        }
    }
}

impl From<Vec<Message>> for FetchResponse {
    fn from(messages: Vec<Message>) -> Self {
        FetchResponse::Bare(messages)
    }
}
