//! Serde adapter for backend timestamps.
//!
//! The backend emits naive ISO-8601 timestamps (UTC without an offset, with
//! optional microseconds).  RFC 3339 input with an explicit offset is also
//! accepted; output is always RFC 3339.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Parse a backend timestamp into an OffsetDateTime, assuming UTC when no offset is given.
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    if let Ok(datetime) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(datetime);
    }
    let naive = PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"),
    )?;
    Ok(naive.assume_utc())
}

/// Deserialize a backend timestamp into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}
