use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A saved link as held by the backend and mirrored by the replica.
///
/// `id` and `created_at` are assigned by the backend; `created_at` is unix
/// milliseconds and never changes after insert. On the wire it may also be an
/// RFC 3339 timestamp, as PostgREST renders `timestamptz` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    #[serde(alias = "user_id")]
    pub owner_id: String,
    pub url: String,
    pub title: String,
    #[serde(deserialize_with = "millis_or_rfc3339")]
    pub created_at: i64,
}

/// Fields submitted when creating a bookmark; the backend fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub owner_id: String,
    pub url: String,
    pub title: String,
}

fn millis_or_rfc3339<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct CreatedAt;

    impl Visitor<'_> for CreatedAt {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("unix milliseconds or an RFC 3339 timestamp")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("timestamp out of range: {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            let at = OffsetDateTime::parse(v, &Rfc3339)
                .map_err(|e| E::custom(format!("invalid timestamp {:?}: {}", v, e)))?;
            i64::try_from(at.unix_timestamp_nanos() / 1_000_000)
                .map_err(|_| E::custom(format!("timestamp out of range: {}", v)))
        }
    }

    deserializer.deserialize_any(CreatedAt)
}
