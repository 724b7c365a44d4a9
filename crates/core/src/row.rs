//! Title rows and updates
//!
//! Nodes store one table keyed by `tconst`. Rows carry a `last_updated`
//! stamp that the engine sets on commit, only when content changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};

/// A stored title row, as observed by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRow {
    /// Primary key
    pub tconst: String,
    /// e.g. `movie`, `short`, `tvSeries`
    pub title_type: String,
    /// Display title
    pub primary_title: String,
    /// Comma separated genres
    pub genres: Option<String>,
    /// Runtime in minutes
    pub runtime_minutes: Option<i32>,
    /// Release year
    pub start_year: Option<i32>,
    /// Commit time of the last content change
    pub last_updated: Option<DateTime<Utc>>,
}

impl TitleRow {
    /// Equality ignoring `last_updated`.
    pub fn same_content(&self, other: &TitleRow) -> bool {
        self.tconst == other.tconst
            && self.title_type == other.title_type
            && self.primary_title == other.primary_title
            && self.genres == other.genres
            && self.runtime_minutes == other.runtime_minutes
            && self.start_year == other.start_year
    }
}

/// Body of an upsert: a full row without the engine-managed stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTitle {
    /// Primary key
    pub tconst: String,
    /// Title type, drives placement
    pub title_type: String,
    /// Display title
    pub primary_title: String,
    /// Release year
    #[serde(default)]
    pub start_year: Option<i32>,
    /// Runtime in minutes
    #[serde(default)]
    pub runtime_minutes: Option<i32>,
    /// Comma separated genres
    #[serde(default)]
    pub genres: Option<String>,
}

impl NewTitle {
    /// Reject rows the store cannot key or place.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.tconst.trim().is_empty() {
            return Err(ProbeError::validation("tconst must not be empty"));
        }
        if self.title_type.trim().is_empty() {
            return Err(ProbeError::validation("title_type must not be empty"));
        }
        if self.primary_title.trim().is_empty() {
            return Err(ProbeError::validation("primary_title must not be empty"));
        }
        Ok(())
    }

    /// Materialize as a stored row.
    pub fn to_row(&self, last_updated: Option<DateTime<Utc>>) -> TitleRow {
        TitleRow {
            tconst: self.tconst.clone(),
            title_type: self.title_type.clone(),
            primary_title: self.primary_title.clone(),
            genres: self.genres.clone(),
            runtime_minutes: self.runtime_minutes,
            start_year: self.start_year,
            last_updated,
        }
    }
}

/// Partial update (`new_data`). Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TitleUpdate {
    /// New title type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_type: Option<String>,
    /// New display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_title: Option<String>,
    /// New release year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_year: Option<i32>,
    /// New runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_minutes: Option<i32>,
    /// New genres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<String>,
}

impl TitleUpdate {
    /// Update touching only `runtime_minutes`.
    pub fn runtime(minutes: i32) -> Self {
        Self {
            runtime_minutes: Some(minutes),
            ..Self::default()
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.title_type.is_none()
            && self.primary_title.is_none()
            && self.start_year.is_none()
            && self.runtime_minutes.is_none()
            && self.genres.is_none()
    }

    /// The row with this update applied. `last_updated` is carried over;
    /// stamping is the engine's job at commit.
    pub fn apply(&self, row: &TitleRow) -> TitleRow {
        let mut next = row.clone();
        if let Some(v) = &self.title_type {
            next.title_type = v.clone();
        }
        if let Some(v) = &self.primary_title {
            next.primary_title = v.clone();
        }
        if let Some(v) = self.start_year {
            next.start_year = Some(v);
        }
        if let Some(v) = self.runtime_minutes {
            next.runtime_minutes = Some(v);
        }
        if let Some(v) = &self.genres {
            next.genres = Some(v.clone());
        }
        next
    }

    /// Whether every field this update sets has that value in `row`.
    pub fn is_reflected_in(&self, row: &TitleRow) -> bool {
        self.title_type.as_ref().map_or(true, |v| &row.title_type == v)
            && self
                .primary_title
                .as_ref()
                .map_or(true, |v| &row.primary_title == v)
            && self.start_year.map_or(true, |v| row.start_year == Some(v))
            && self
                .runtime_minutes
                .map_or(true, |v| row.runtime_minutes == Some(v))
            && self
                .genres
                .as_ref()
                .map_or(true, |v| row.genres.as_deref() == Some(v.as_str()))
    }
}

/// Filter and window of a title listing. Rows are ordered by
/// `start_year` descending (rows without a year last), then by `tconst`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleQuery {
    /// Only rows of this title type
    pub title_type: Option<String>,
    /// Maximum rows returned
    pub limit: u64,
    /// Rows skipped before the window starts
    pub offset: u64,
}

impl TitleQuery {
    /// Whether `row` passes the filter.
    pub fn matches(&self, row: &TitleRow) -> bool {
        self.title_type
            .as_deref()
            .map_or(true, |t| row.title_type == t)
    }

    /// Sort `rows` into listing order and cut the window. Returns the page
    /// and the number of rows that matched before windowing.
    pub fn window(&self, mut rows: Vec<TitleRow>) -> TitlePage {
        rows.retain(|r| self.matches(r));
        let total = rows.len() as u64;
        rows.sort_by(|a, b| {
            b.start_year
                .cmp(&a.start_year)
                .then_with(|| a.tconst.cmp(&b.tconst))
        });
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(offset).take(limit).collect();
        TitlePage { rows, total }
    }
}

/// One window of a title listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TitlePage {
    /// Rows in listing order
    pub rows: Vec<TitleRow>,
    /// Rows matching the filter across all windows
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carmencita() -> TitleRow {
        TitleRow {
            tconst: "tt0000001".into(),
            title_type: "short".into(),
            primary_title: "Carmencita".into(),
            genres: Some("Documentary,Short".into()),
            runtime_minutes: Some(1),
            start_year: Some(1894),
            last_updated: None,
        }
    }

    #[test]
    fn apply_touches_only_set_fields() {
        let row = carmencita();
        let next = TitleUpdate::runtime(150).apply(&row);
        assert_eq!(next.runtime_minutes, Some(150));
        assert_eq!(next.primary_title, row.primary_title);
        assert_eq!(next.genres, row.genres);
    }

    #[test]
    fn reflected_checks_every_set_field() {
        let row = carmencita();
        let update = TitleUpdate {
            runtime_minutes: Some(150),
            genres: Some("Drama".into()),
            ..TitleUpdate::default()
        };
        assert!(!update.is_reflected_in(&row));
        assert!(update.is_reflected_in(&update.apply(&row)));
        assert!(TitleUpdate::default().is_reflected_in(&row));
    }

    #[test]
    fn same_content_ignores_stamp() {
        let a = carmencita();
        let mut b = carmencita();
        b.last_updated = Some(Utc::now());
        assert!(a.same_content(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn update_rejects_unknown_fields() {
        let err = serde_json::from_str::<TitleUpdate>(r#"{"tconst":"tt1","runtime_minutes":5}"#);
        assert!(err.is_err());
        let ok: TitleUpdate = serde_json::from_str(r#"{"runtime_minutes":5}"#).unwrap();
        assert_eq!(ok, TitleUpdate::runtime(5));
    }

    #[test]
    fn new_title_validation() {
        let mut title = NewTitle {
            tconst: "tt9".into(),
            title_type: "movie".into(),
            primary_title: "Nine".into(),
            start_year: None,
            runtime_minutes: None,
            genres: None,
        };
        assert!(title.validate().is_ok());
        title.tconst = "  ".into();
        assert!(matches!(
            title.validate(),
            Err(ProbeError::Validation { .. })
        ));
    }

    fn dated(tconst: &str, year: Option<i32>, title_type: &str) -> TitleRow {
        TitleRow {
            tconst: tconst.into(),
            title_type: title_type.into(),
            start_year: year,
            ..carmencita()
        }
    }

    #[test]
    fn listing_orders_newest_first_and_windows() {
        let rows = vec![
            dated("tt3", Some(1894), "short"),
            dated("tt1", None, "short"),
            dated("tt2", Some(1901), "short"),
            dated("tt4", Some(1894), "short"),
            dated("tt5", Some(1950), "movie"),
        ];
        let query = TitleQuery {
            title_type: Some("short".into()),
            limit: 2,
            offset: 1,
        };
        let page = query.window(rows.clone());
        assert_eq!(page.total, 4);
        let keys: Vec<_> = page.rows.iter().map(|r| r.tconst.as_str()).collect();
        assert_eq!(keys, ["tt3", "tt4"]);

        let all = TitleQuery {
            limit: 10,
            ..TitleQuery::default()
        }
        .window(rows);
        let keys: Vec<_> = all.rows.iter().map(|r| r.tconst.as_str()).collect();
        assert_eq!(keys, ["tt5", "tt2", "tt3", "tt4", "tt1"]);
    }
}
