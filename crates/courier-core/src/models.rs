//! Domain models and strongly-typed identifiers for queued mail.
//!
//! Defines the queue record, the mail payload carried through to the
//! transport, and newtype ID wrappers for compile-time type safety. The
//! content format and charset are closed enums validated at the enqueue
//! boundary, so invalid values are unrepresentable past parsing.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
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

/// Strongly-typed message identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Assigned once at
/// insert and immutable for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for MessageId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for MessageId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Content format of an outbound message body.
///
/// The queue accepts exactly these formats; anything else is rejected at the
/// enqueue boundary rather than checked downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailFormat {
    /// `text/html`
    Html,
    /// `text/plain`
    Plain,
}

impl MailFormat {
    /// Returns the MIME type for this format.
    pub const fn as_mime(self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Plain => "text/plain",
        }
    }

    /// Parses a MIME type string into a format, if recognized.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "text/html" => Some(Self::Html),
            "text/plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

impl fmt::Display for MailFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

impl FromStr for MailFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mime(s)
            .ok_or_else(|| CoreError::validation(format!("unsupported content type: {s}")))
    }
}

/// Character encoding of an outbound message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    /// `UTF-8`
    Utf8,
    /// `ISO-8859-1`
    Latin1,
}

impl Charset {
    /// Returns the IANA label for this charset.
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "ISO-8859-1",
        }
    }

    /// Parses an IANA charset label, if recognized.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "UTF-8" => Some(Self::Utf8),
            "ISO-8859-1" => Some(Self::Latin1),
            _ => None,
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for Charset {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| CoreError::validation(format!("unsupported charset: {s}")))
    }
}

/// Fully-formed outbound message content.
///
/// Owned by the producer and passed through to the transport unexamined
/// beyond required-field presence. Address lists are kept as vectors in the
/// domain type and comma-joined in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailPayload {
    /// Message subject line.
    pub subject: String,
    /// Message body in the declared format.
    pub body: String,
    /// Sender addresses.
    pub from: Vec<String>,
    /// Primary recipient addresses.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    #[serde(default)]
    pub cc: Vec<String>,
    /// Blind-carbon-copy recipients.
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Body content format.
    pub format: MailFormat,
    /// Body character encoding.
    pub charset: Charset,
    /// Optional structured sidecar data, stored alongside the message and
    /// passed through to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl MailPayload {
    /// Creates a plain-text UTF-8 payload with the minimum required fields.
    pub fn plain(
        subject: impl Into<String>,
        body: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            from: vec![from.into()],
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            format: MailFormat::Plain,
            charset: Charset::Utf8,
            metadata: None,
        }
    }

    /// Checks required-field presence.
    ///
    /// Subject, body, sender, and at least one recipient must be present and
    /// non-blank. Format and charset need no checking here: the closed enums
    /// already constrain them.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.subject.trim().is_empty() {
            return Err(CoreError::validation("subject must not be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(CoreError::validation("body must not be empty"));
        }
        if self.from.iter().all(|addr| addr.trim().is_empty()) {
            return Err(CoreError::validation("at least one sender address is required"));
        }
        if self.to.iter().all(|addr| addr.trim().is_empty()) {
            return Err(CoreError::validation("at least one recipient address is required"));
        }
        Ok(())
    }
}

/// Joins an address list into its comma-separated storage form.
pub fn join_addresses(addresses: &[String]) -> String {
    addresses.join(",")
}

/// Splits a comma-separated storage value back into an address list.
///
/// An empty column yields an empty list, not a list of one empty string.
pub fn split_addresses(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(',').map(str::to_string).collect()
}

/// A message to be inserted into the queue.
///
/// Produced by the enqueuer after boundary validation; the store assigns the
/// identifier and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Validated message content.
    pub payload: MailPayload,
    /// Scheduling priority; lower value is processed first.
    pub priority: i32,
    /// Attempt budget before the message goes inert.
    pub max_attempts: i32,
}

/// One outbound message awaiting delivery.
///
/// The record is either unlocked, freshly locked (claimed within the stale
/// window), or stalely locked; `updated_at` is refreshed on every claim and
/// mutation and is what staleness is judged against.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Unique identifier, assigned at insert.
    pub id: MessageId,
    /// Message content passed through to the transport.
    pub payload: MailPayload,
    /// Scheduling priority; lower value is processed first.
    pub priority: i32,
    /// Delivery attempts made so far.
    pub attempts: i32,
    /// Attempt budget.
    pub max_attempts: i32,
    /// Whether a worker currently holds a claim on this record.
    pub locked: bool,
    /// Insertion timestamp; secondary ordering key.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last claim or mutation.
    pub updated_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Whether the attempt budget is spent.
    ///
    /// An exhausted record is never selected again; it stays in storage
    /// untouched unless an operator intervenes.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for QueuedMessage {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let content_type: String = row.try_get("content_type")?;
        let format = MailFormat::from_mime(&content_type).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "content_type".into(),
                source: format!("unknown content type: {content_type}").into(),
            }
        })?;

        let charset_label: String = row.try_get("charset")?;
        let charset =
            Charset::from_label(&charset_label).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "charset".into(),
                source: format!("unknown charset: {charset_label}").into(),
            })?;

        let from_addrs: String = row.try_get("from_addrs")?;
        let to_addrs: String = row.try_get("to_addrs")?;
        let cc_addrs: String = row.try_get("cc_addrs")?;
        let bcc_addrs: String = row.try_get("bcc_addrs")?;

        Ok(Self {
            id: row.try_get("id")?,
            payload: MailPayload {
                subject: row.try_get("subject")?,
                body: row.try_get("body")?,
                from: split_addresses(&from_addrs),
                to: split_addresses(&to_addrs),
                cc: split_addresses(&cc_addrs),
                bcc: split_addresses(&bcc_addrs),
                format,
                charset,
                metadata: row.try_get("metadata")?,
            },
            priority: row.try_get("priority")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            locked: row.try_get("locked")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
