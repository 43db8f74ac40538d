//! Identifier and state types shared by expenses and categories.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier supplied by the identity provider.
///
/// Every record and every remote call is partitioned by it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an identity-provider user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty (never assigned).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Store-assigned local identifier.
///
/// Monotonically increasing and never reused within one store, so ordering
/// by `LocalId` is creation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(u64);

impl LocalId {
    /// Creates a local id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Remote document identifier assigned by the remote API.
///
/// The string `"0"` is the sentinel for "not yet assigned".
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Sentinel value used before the remote assigns an id.
    pub const UNASSIGNED: &'static str = "0";

    /// Wraps a remote document id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the sentinel id.
    #[must_use]
    pub fn unassigned() -> Self {
        Self(Self::UNASSIGNED.to_string())
    }

    /// Returns true if the remote has assigned this id.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty() && self.0 != Self::UNASSIGNED
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RemoteId {
    fn default() -> Self {
        Self::unassigned()
    }
}

impl fmt::Debug for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteId({})", self.0)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a record's current content is confirmed by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Written locally, not yet confirmed remotely.
    Pending,
    /// Matches a confirmed remote write.
    Synced,
}

impl SyncState {
    /// Returns true for [`SyncState::Pending`].
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, SyncState::Pending)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Pending => f.write_str("pending"),
            SyncState::Synced => f.write_str("synced"),
        }
    }
}

/// The two record kinds held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// An [`crate::Expense`].
    Expense,
    /// A [`crate::Category`].
    Category,
}

impl RecordKind {
    /// Tag byte used in record log frames.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            RecordKind::Expense => 1,
            RecordKind::Category => 2,
        }
    }

    /// Parses a frame tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(RecordKind::Expense),
            2 => Some(RecordKind::Category),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Expense => f.write_str("expense"),
            RecordKind::Category => f.write_str("category"),
        }
    }
}

/// A UTC creation timestamp with millisecond precision.
///
/// Rendered as `YYYY-MM-DDTHH:MM:SS.sssZ`, the format the remote API stores.
/// Sub-millisecond digits are dropped on construction so a timestamp survives
/// a round trip through the API unchanged and can take part in natural keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wraps a `DateTime`, truncating to milliseconds.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(3))
    }

    /// Parses an RFC 3339 / ISO-8601 timestamp and converts it to UTC.
    pub fn parse(text: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(text).map(|at| Self::from_datetime(at.with_timezone(&Utc)))
    }

    /// Returns the wrapped `DateTime`.
    #[must_use]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Formats as `YYYY-MM-DDTHH:MM:SS.sssZ`.
    #[must_use]
    pub fn to_iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = chrono::ParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_iso()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_iso())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_id_sentinel() {
        assert!(!RemoteId::unassigned().is_assigned());
        assert!(!RemoteId::new("").is_assigned());
        assert!(RemoteId::new("doc-17").is_assigned());
        assert_eq!(RemoteId::default().as_str(), "0");
    }

    #[test]
    fn user_id_blank_is_empty() {
        assert!(UserId::new("  ").is_empty());
        assert!(!UserId::from("uid-1").is_empty());
    }

    #[test]
    fn record_kind_tags() {
        for kind in [RecordKind::Expense, RecordKind::Category] {
            assert_eq!(RecordKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(RecordKind::from_tag(0), None);
    }

    #[test]
    fn timestamp_iso_format() {
        let ts = Timestamp::parse("2024-10-01T08:15:30.123Z").unwrap();
        assert_eq!(ts.to_iso(), "2024-10-01T08:15:30.123Z");
    }

    #[test]
    fn timestamp_drops_sub_millis_and_offsets() {
        let ts = Timestamp::parse("2024-10-01T10:15:30.123456+02:00").unwrap();
        assert_eq!(ts.to_iso(), "2024-10-01T08:15:30.123Z");
        assert_eq!(Timestamp::parse(&ts.to_iso()).unwrap(), ts);
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert!(Timestamp::parse("yesterday").is_err());
    }
}
