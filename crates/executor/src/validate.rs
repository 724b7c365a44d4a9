//! Request validation
//!
//! Everything the controller needs checked before a run starts. Failures are
//! always `ValidationError`.

use std::time::Duration;

use isoprobe_concurrency::{ConflictSchedule, ReaderPlan};
use isoprobe_core::{
    IsolationLevel, ProbeError, ProbeResult, ScenarioConfig, TitleQuery, TitleUpdate,
};

use crate::request::{ListTitlesQuery, ScheduleRequest};

/// Upper bound on actors of one kind per node.
pub const MAX_ACTORS_PER_NODE: u32 = 32;

/// Trimmed, non-empty record id.
pub fn tconst(raw: &str) -> ProbeResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::validation("tconst must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Parse an isolation level name; absent means `READ_COMMITTED`.
pub fn isolation(raw: Option<&str>) -> ProbeResult<IsolationLevel> {
    match raw {
        None => Ok(IsolationLevel::default()),
        Some(name) => name.parse(),
    }
}

/// Positive actor count, `default` when absent.
pub fn actor_count(name: &str, raw: Option<u32>, default: u32) -> ProbeResult<u32> {
    let count = raw.unwrap_or(default);
    if count == 0 {
        return Err(ProbeError::validation(format!("{name} must be positive")));
    }
    if count > MAX_ACTORS_PER_NODE {
        return Err(ProbeError::validation(format!(
            "{name} must not exceed {MAX_ACTORS_PER_NODE}"
        )));
    }
    Ok(count)
}

/// Rows per page when `limit` is absent.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Upper bound on `limit`.
pub const MAX_PAGE_SIZE: u64 = 100;

/// Resolve a listing query into a 1-based page number and a storage window.
pub fn listing(raw: &ListTitlesQuery) -> ProbeResult<(u64, TitleQuery)> {
    let page = raw.page.unwrap_or(1);
    if page == 0 {
        return Err(ProbeError::validation("page must be at least 1"));
    }
    let limit = raw.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ProbeError::validation(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    let title_type = match raw.title_type.as_deref().map(str::trim) {
        Some("") => return Err(ProbeError::validation("title_type must not be empty")),
        other => other.map(str::to_string),
    };
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| ProbeError::validation("page is out of range"))?;
    Ok((
        page,
        TitleQuery {
            title_type,
            limit,
            offset,
        },
    ))
}

/// `new_data` must set at least one field.
pub fn update(update: &TitleUpdate) -> ProbeResult<()> {
    if update.is_empty() {
        return Err(ProbeError::validation("new_data must set at least one field"));
    }
    if update.title_type.as_deref().is_some_and(|t| t.trim().is_empty())
        || update.primary_title.as_deref().is_some_and(|t| t.trim().is_empty())
    {
        return Err(ProbeError::validation(
            "new_data must not blank title_type or primary_title",
        ));
    }
    Ok(())
}

/// Merge an explicit schedule over the configured default.
pub fn schedule(
    raw: Option<&ScheduleRequest>,
    config: &ScenarioConfig,
) -> ProbeResult<ConflictSchedule> {
    let mut schedule = ConflictSchedule::from_config(config);
    let Some(raw) = raw else {
        return Ok(schedule);
    };
    if let Some(start) = raw.writer_start_ms {
        schedule.writer.start = Duration::from_millis(start);
    }
    if let Some(hold) = raw.write_hold_ms {
        schedule.writer.hold = Duration::from_millis(hold);
    }
    let limit = config.scenario_timeout_ms;
    if schedule.writer.start.as_millis() as u64 >= limit {
        return Err(ProbeError::validation(format!(
            "schedule.writer_start_ms must be below the {limit}ms scenario timeout"
        )));
    }
    schedule.readers = raw
        .readers
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if r.read2_ms < r.start_ms {
                return Err(ProbeError::validation(format!(
                    "schedule.readers[{i}]: read2_ms must not precede start_ms"
                )));
            }
            if r.read2_ms >= limit {
                return Err(ProbeError::validation(format!(
                    "schedule.readers[{i}]: read2_ms must be below the {limit}ms scenario timeout"
                )));
            }
            Ok(ReaderPlan {
                start: Duration::from_millis(r.start_ms),
                read2_at: Duration::from_millis(r.read2_ms),
            })
        })
        .collect::<ProbeResult<Vec<_>>>()?;
    Ok(schedule)
}
