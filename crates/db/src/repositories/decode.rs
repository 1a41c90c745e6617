//! Column decoding shared by the SQL repositories. Timestamps are RFC 3339
//! text, dates ISO 8601, collections JSON.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::RepositoryError;

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `{column}` (expected non-negative u32): {value}"))
    })
}

pub(crate) fn parse_optional_u32(column: &str, value: Option<i64>) -> Result<Option<u32>, RepositoryError> {
    value.map(|value| parse_u32(column, value)).transpose()
}

pub(crate) fn parse_optional_i32(column: &str, value: Option<i64>) -> Result<Option<i32>, RepositoryError> {
    value
        .map(|value| {
            i32::try_from(value)
                .map_err(|_| RepositoryError::Decode(format!("invalid value for `{column}`: {value}")))
        })
        .transpose()
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})")))
}

pub(crate) fn parse_enum<T>(column: &str, value: String, parse: impl Fn(&str) -> Option<T>) -> Result<T, RepositoryError> {
    parse(&value).ok_or_else(|| RepositoryError::Decode(format!("unknown value in `{column}`: `{value}`")))
}

pub(crate) fn parse_json<T: DeserializeOwned>(column: &str, value: String) -> Result<T, RepositoryError> {
    serde_json::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_json<T: Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}
