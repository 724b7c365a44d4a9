//! Inbound request bodies
//!
//! Bodies are deserialized as-is; checking them is [`crate::validate`]'s job.
//! Any JSON that does not fit these shapes is a `ValidationError`.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use isoprobe_core::{ProbeError, ProbeResult, TitleUpdate};

/// `POST /test/concurrent-read`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConcurrentReadRequest {
    /// Target record
    pub tconst: String,
    /// Level name; `READ_COMMITTED` when absent
    #[serde(default)]
    pub isolation_level: Option<String>,
    /// Readers per node
    #[serde(default)]
    pub readers: Option<u32>,
}

/// `POST /test/read-write-conflict`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadWriteRequest {
    /// Target record
    pub tconst: String,
    /// Values the writers apply
    pub new_data: TitleUpdate,
    /// Level name; `READ_COMMITTED` when absent
    #[serde(default)]
    pub isolation_level: Option<String>,
    /// Readers per node
    #[serde(default)]
    pub readers: Option<u32>,
    /// Writers per node
    #[serde(default)]
    pub writers: Option<u32>,
    /// Explicit timing
    #[serde(default)]
    pub schedule: Option<ScheduleRequest>,
}

/// Explicit read-write timing, offsets in milliseconds from the run start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleRequest {
    /// Writer begin offset
    #[serde(default)]
    pub writer_start_ms: Option<u64>,
    /// Time writers keep their update uncommitted
    #[serde(default)]
    pub write_hold_ms: Option<u64>,
    /// One plan per reader index
    #[serde(default)]
    pub readers: Vec<ReaderScheduleRequest>,
}

/// Timing of one reader index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderScheduleRequest {
    /// Begin and `read1`
    pub start_ms: u64,
    /// `read2`
    pub read2_ms: u64,
}

/// `POST /nodes/{node}/availability`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AvailabilityRequest {
    /// Desired state
    pub online: bool,
}

/// `GET /titles` query string: `page`, `limit` and `title_type`, all
/// optional. Values are plain tokens; percent-encoding is not decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListTitlesQuery {
    /// 1-based page number
    pub page: Option<u64>,
    /// Rows per page
    pub limit: Option<u64>,
    /// Only rows of this title type
    pub title_type: Option<String>,
}

impl ListTitlesQuery {
    /// Parse `page=2&limit=10&title_type=short`. Unknown keys, repeated
    /// keys and non-numeric counts are `ValidationError`.
    pub fn parse(raw: Option<&str>) -> ProbeResult<Self> {
        let mut query = Self::default();
        for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if value.contains('%') {
                return Err(ProbeError::validation(format!(
                    "percent-encoded value for {key} is not supported"
                )));
            }
            let duplicate = match key {
                "page" => query.page.replace(count(key, value)?).is_some(),
                "limit" => query.limit.replace(count(key, value)?).is_some(),
                "title_type" => query.title_type.replace(value.to_string()).is_some(),
                other => {
                    return Err(ProbeError::validation(format!(
                        "unknown query parameter {other}"
                    )))
                }
            };
            if duplicate {
                return Err(ProbeError::validation(format!(
                    "query parameter {key} given twice"
                )));
            }
        }
        Ok(query)
    }
}

fn count(key: &str, value: &str) -> ProbeResult<u64> {
    value
        .parse()
        .map_err(|_| ProbeError::validation(format!("{key} must be a non-negative integer")))
}

/// Deserialize a JSON body, reporting malformed input as `ValidationError`.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ProbeResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ProbeError::validation(format!("invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_request_with_schedule() {
        let body = br#"{
            "tconst": "tt0000001",
            "new_data": {"runtime_minutes": 150},
            "isolation_level": "read committed",
            "writers": 2,
            "schedule": {"write_hold_ms": 500, "readers": [{"start_ms": 50, "read2_ms": 600}]}
        }"#;
        let req: ReadWriteRequest = parse_json(body).unwrap();
        assert_eq!(req.new_data, TitleUpdate::runtime(150));
        assert_eq!(req.writers, Some(2));
        assert_eq!(req.readers, None);
        let schedule = req.schedule.unwrap();
        assert_eq!(schedule.write_hold_ms, Some(500));
        assert_eq!(schedule.readers[0].read2_ms, 600);
    }

    #[test]
    fn malformed_bodies_are_validation_errors() {
        for body in [
            &br#"{"tconst": 5}"#[..],
            br#"not json"#,
            br#"{"tconst":"tt1","new_data":{"tconst":"tt2"}}"#,
        ] {
            let err = parse_json::<ReadWriteRequest>(body).unwrap_err();
            assert!(matches!(err, ProbeError::Validation { .. }), "{body:?}");
        }
    }

    #[test]
    fn listing_query_string() {
        let q = ListTitlesQuery::parse(Some("page=2&limit=5&title_type=short")).unwrap();
        assert_eq!(q.page, Some(2));
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.title_type.as_deref(), Some("short"));
        assert_eq!(ListTitlesQuery::parse(None).unwrap(), ListTitlesQuery::default());

        for raw in ["page=x", "limit=-1", "sort=year", "page=1&page=2", "title_type=tv%20Series"] {
            let err = ListTitlesQuery::parse(Some(raw)).unwrap_err();
            assert!(matches!(err, ProbeError::Validation { .. }), "{raw}");
        }
    }
}
