//! Database row types and column codecs.
//! Collections with a public shape are decoded straight into the
//! wadmin-types models; rows that never leave the server stay here.
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_admin: bool,
    pub created_at: String,
}

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|r| decode_ts(idx, r)).transpose()
}

pub(crate) fn decode_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    raw.parse::<Uuid>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_opt_uuid(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    raw.map(|r| decode_uuid(idx, r)).transpose()
}

pub(crate) fn decode_enum<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
