//! Call request/response values and the persisted audit record.
//!
//! `CallRequest` and `CallResponse` are immutable once built; the request id
//! they carry is the correlation key tying every audit row of one logical
//! call together, retries included. `AuditRecord` mirrors one row of the
//! `api_call_audit` table.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Opaque correlation key for one logical call.
///
/// Defaults to a freshly generated UUID v4 rendered as a string, but any
/// caller-supplied string is accepted so ids from upstream systems can be
/// carried through.
///
/// # Example
///
/// ```
/// use callaudit_core::models::RequestId;
/// let id = RequestId::new();
/// assert_eq!(id.as_str().len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a new random request id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl sqlx::Type<PgDb> for RequestId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RequestId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(s))
    }
}

impl sqlx::Encode<'_, PgDb> for RequestId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// HTTP methods the audited client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// An outbound call as the application asked for it.
///
/// Fields are private so a request cannot change after the `Initiated`
/// event has been published for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    request_id: RequestId,
    method: HttpMethod,
    endpoint: String,
    payload: Option<String>,
}

impl CallRequest {
    /// Builds a request with a freshly generated id.
    pub fn new(method: HttpMethod, endpoint: impl Into<String>, payload: Option<String>) -> Self {
        Self::with_request_id(RequestId::new(), method, endpoint, payload)
    }

    /// Builds a request that reuses an existing correlation id.
    pub fn with_request_id(
        request_id: RequestId,
        method: HttpMethod,
        endpoint: impl Into<String>,
        payload: Option<String>,
    ) -> Self {
        Self { request_id, method, endpoint: endpoint.into(), payload }
    }

    /// Correlation id shared by every event of this call.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// HTTP method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Target endpoint, absolute URL or path relative to the client's base.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serialized request body, if any.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

/// Body and status of a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    data: String,
    status_code: u16,
}

impl CallResponse {
    /// Creates a response value.
    pub fn new(data: impl Into<String>, status_code: u16) -> Self {
        Self { data: data.into(), status_code }
    }

    /// Raw response body.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// HTTP status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Consumes the response and returns its body.
    pub fn into_data(self) -> String {
        self.data
    }
}

/// Failure description carried by an error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    /// Human readable failure message.
    pub message: String,

    /// Coarse category such as `network` or `server`, when known.
    pub classification: Option<String>,
}

impl ErrorCause {
    /// Creates a cause from a message and optional classification.
    pub fn new(message: impl Into<String>, classification: Option<String>) -> Self {
        Self { message: message.into(), classification }
    }
}

/// Kind of an audit row.
///
/// `RetryError` marks an error event raised by a retry attempt rather than
/// the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Call was about to be sent.
    Initiated,
    /// Call completed with a 2xx response.
    Success,
    /// First attempt failed.
    Error,
    /// A retry attempt failed.
    RetryError,
}

impl EventKind {
    /// All kinds, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Initiated, Self::Success, Self::Error, Self::RetryError];

    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::RetryError => "RETRY_ERROR",
        }
    }

    /// Kind for an error event given its retry flag.
    pub const fn for_error(is_retry: bool) -> Self {
        if is_retry {
            Self::RetryError
        } else {
            Self::Error
        }
    }

    /// Whether this kind records a failed attempt.
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::RetryError)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIATED" => Ok(Self::Initiated),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "RETRY_ERROR" => Ok(Self::RetryError),
            _ => Err(CoreError::InvalidInput(format!("unknown event kind: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for EventKind {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventKind {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "INITIATED" => Ok(Self::Initiated),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "RETRY_ERROR" => Ok(Self::RetryError),
            _ => Err(format!("invalid event kind: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for EventKind {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Audit row before the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    /// Row kind.
    pub event_kind: EventKind,
    /// Correlation id of the call.
    pub request_id: RequestId,
    /// Endpoint the call targeted.
    pub endpoint: String,
    /// Normalized request payload.
    pub payload: Option<Value>,
    /// Normalized response body, success rows only.
    pub response: Option<Value>,
    /// HTTP status, success rows only.
    pub status_code: Option<i32>,
    /// Normalized error message, error rows only.
    pub error_message: Option<Value>,
    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// Zero-based attempt index of an error row; 0 elsewhere.
    pub retry_count: i32,
    /// Whether the row came from a retry attempt.
    pub is_retry: bool,
}

/// Persisted audit row.
///
/// Rows are append-only. Nothing in this workspace updates or deletes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Surrogate id assigned by the store.
    pub id: i64,
    /// Row kind.
    pub event_kind: EventKind,
    /// Correlation id of the call.
    pub request_id: RequestId,
    /// Endpoint the call targeted.
    pub endpoint: String,
    /// Normalized request payload.
    pub payload: Option<Value>,
    /// Normalized response body.
    pub response: Option<Value>,
    /// HTTP status.
    pub status_code: Option<i32>,
    /// Normalized error message.
    pub error_message: Option<Value>,
    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// Zero-based attempt index.
    pub retry_count: i32,
    /// Whether the row came from a retry attempt.
    pub is_retry: bool,
}

impl AuditRecord {
    /// Attaches a store-assigned id to a new record.
    pub fn from_new(id: i64, record: NewAuditRecord) -> Self {
        Self {
            id,
            event_kind: record.event_kind,
            request_id: record.request_id,
            endpoint: record.endpoint,
            payload: record.payload,
            response: record.response,
            status_code: record.status_code,
            error_message: record.error_message,
            timestamp: record.timestamp,
            retry_count: record.retry_count,
            is_retry: record.is_retry,
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for AuditRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::{types::Json, Row};

        let payload: Option<Json<Value>> = row.try_get("payload")?;
        let response: Option<Json<Value>> = row.try_get("response")?;
        let error_message: Option<Json<Value>> = row.try_get("error_message")?;

        Ok(Self {
            id: row.try_get("id")?,
            event_kind: row.try_get("event_kind")?,
            request_id: row.try_get("request_id")?,
            endpoint: row.try_get("endpoint")?,
            payload: payload.map(|json| json.0),
            response: response.map(|json| json.0),
            status_code: row.try_get("status_code")?,
            error_message: error_message.map(|json| json.0),
            timestamp: row.try_get("occurred_at")?,
            retry_count: row.try_get("retry_count")?,
            is_retry: row.try_get("is_retry")?,
        })
    }
}
