//! Core types for task-relay

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a task
///
/// Generated once by the submitter and used as the only join key between the
/// queue message and the store record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Stored as TEXT so the database stays readable with the sqlite3 shell
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(text.parse()?))
    }
}

/// HTTP methods a task may use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
}

impl Method {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(format!("unsupported method '{s}', expected GET or POST")),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Header mapping of name to a `;`-joined list of values
///
/// `{"X-Foo": "a;b"}` stands for two `X-Foo` entries on the wire. Entry order
/// within a name is kept, order between names is not significant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Headers(pub BTreeMap<String, String>);

/// Separator between the values of a repeated header
pub const HEADER_VALUE_SEPARATOR: char = ';';

impl Headers {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no headers
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joined value list for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Insert a joined value list, replacing any previous one
    pub fn insert(&mut self, name: impl Into<String>, values: impl Into<String>) {
        self.0.insert(name.into(), values.into());
    }

    /// Expand into wire headers, one entry per `;`-separated value
    ///
    /// Fails on the first name or value that is not a valid HTTP header.
    pub fn to_header_map(&self) -> Result<HeaderMap, String> {
        let mut map = HeaderMap::new();
        for (name, values) in &self.0 {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("invalid header name '{name}': {e}"))?;
            for value in values.split(HEADER_VALUE_SEPARATOR) {
                let header_value = HeaderValue::from_str(value)
                    .map_err(|e| format!("invalid value for header '{name}': {e}"))?;
                map.append(header_name.clone(), header_value);
            }
        }
        Ok(map)
    }

    /// Collapse wire headers into the joined form with Title-Case names
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = BTreeMap::new();
        for name in map.keys() {
            let joined = map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(&HEADER_VALUE_SEPARATOR.to_string());
            headers.insert(canonical_header_name(name.as_str()), joined);
        }
        Self(headers)
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Title-Case a header name: `content-type` becomes `Content-Type`
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// A unit of outbound HTTP work as carried on the queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Target URL
    pub url: String,
    /// HTTP method
    #[schema(value_type = String, example = "GET")]
    pub method: Method,
    /// Request headers
    #[serde(default)]
    pub headers: Headers,
    /// Request body
    #[serde(default)]
    pub body: String,
}

/// A task submission before it has been validated and assigned an id
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct NewTask {
    /// Target URL, must be absolute http(s)
    pub url: String,
    /// HTTP method, GET or POST in any letter case
    pub method: String,
    /// Request headers
    #[serde(default)]
    pub headers: Option<Headers>,
    /// Request body
    #[serde(default)]
    pub body: Option<String>,
}

/// Response returned when a task is accepted
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskCreated {
    /// Identifier to poll for the result
    pub id: TaskId,
}

/// Task lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted and published, not yet picked up
    New,
    /// A worker is executing the request
    InProcess,
    /// The target responded (any status code)
    Done,
    /// The request could not be completed
    Error,
}

impl TaskStatus {
    /// Value stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::InProcess => "in_process",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }

    /// Parse a stored status value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(TaskStatus::New),
            "in_process" => Some(TaskStatus::InProcess),
            "done" => Some(TaskStatus::Done),
            "error" => Some(TaskStatus::Error),
            _ => None,
        }
    }

    /// True for `done` and `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored state of a task, terminal once `status` is done or error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    /// Task identifier
    pub id: TaskId,
    /// Current status
    pub status: TaskStatus,
    /// HTTP status code of the response (only set when done)
    #[serde(rename = "http_status_code", skip_serializing_if = "Option::is_none", default)]
    pub status_code: Option<u16>,
    /// Response headers
    #[serde(default)]
    pub headers: Headers,
    /// Response body exactly as read, base64 in JSON
    #[serde(with = "base64_body", default)]
    #[schema(value_type = String, format = Byte)]
    pub body: Vec<u8>,
    /// Bytes actually read from the response body
    #[serde(default)]
    pub content_length: u64,
}

impl TaskResult {
    /// A record with only a status, as written by `add_task` and status updates
    pub fn with_status(id: TaskId, status: TaskStatus) -> Self {
        Self {
            id,
            status,
            status_code: None,
            headers: Headers::default(),
            body: Vec::new(),
            content_length: 0,
        }
    }
}

/// Response bodies are arbitrary bytes; JSON carries them as standard base64
mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Event emitted by the requester while processing tasks
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A decoded task arrived from the queue
    TaskReceived {
        /// Task ID
        id: TaskId,
    },

    /// The pool had no free worker and the task was dropped
    TaskRejected {
        /// Task ID
        id: TaskId,
        /// Reason reported by the pool
        reason: String,
    },

    /// A worker marked the task in process
    TaskStarted {
        /// Task ID
        id: TaskId,
    },

    /// The target responded and the result was stored
    TaskCompleted {
        /// Task ID
        id: TaskId,
        /// HTTP status code returned by the target
        status_code: u16,
        /// Bytes read from the response body
        content_length: u64,
    },

    /// Dispatch failed and the task was marked as error
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Dispatch error message
        error: String,
    },

    /// The task could not be marked in process and was not dispatched
    TaskAborted {
        /// Task ID
        id: TaskId,
        /// Store error message
        error: String,
    },

    /// The requester began shutting down
    Shutdown,
}

impl Event {
    /// Name used as the SSE event type; matches the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TaskReceived { .. } => "task_received",
            Event::TaskRejected { .. } => "task_rejected",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
            Event::TaskAborted { .. } => "task_aborted",
            Event::Shutdown => "shutdown",
        }
    }
}
