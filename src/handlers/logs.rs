// handlers/logs.rs - /api/logs, /api/logs/types, /api/logs/stats

use axum::extract::{rejection::QueryRejection, Query, State};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::database::models::{ActionCount, AuditEntry, LogQuery};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{Paged, Pagination};

#[derive(Debug, Deserialize)]
pub struct LogListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub username: Option<String>,
    pub action: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogStats {
    pub today_count: i64,
    pub action_counts: Vec<ActionCount>,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date (midnight UTC)
fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&parsed));
    }
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&midnight));
    }
    Err(ApiError::bad_request(format!("Invalid {}: '{}'", field, value)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// GET /api/logs - Newest first
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<LogListQuery>, QueryRejection>,
) -> ApiResult<Paged<AuditEntry>> {
    let Query(query) = query?;
    let page = state.page(&Pagination { page: query.page, page_size: query.page_size });

    let filter = LogQuery {
        username: non_empty(query.username),
        action: non_empty(query.action),
        start_time: non_empty(query.start_time)
            .map(|v| parse_time("start_time", &v))
            .transpose()?,
        end_time: non_empty(query.end_time)
            .map(|v| parse_time("end_time", &v))
            .transpose()?,
    };

    let (entries, total) = state.store.list_logs(&filter, page).await?;
    Ok(ApiResponse::success(Paged::new(entries, total, page)))
}

/// GET /api/logs/types - Distinct recorded actions
pub async fn types(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(ApiResponse::success(state.store.log_actions().await?))
}

/// GET /api/logs/stats - Entries since midnight UTC and totals per action
pub async fn stats(State(state): State<AppState>) -> ApiResult<LogStats> {
    let midnight = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(Utc::now);

    Ok(ApiResponse::success(LogStats {
        today_count: state.store.count_logs_since(midnight).await?,
        action_counts: state.store.log_action_counts().await?,
    }))
}
