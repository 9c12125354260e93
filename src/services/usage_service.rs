//! 风险报告用量上报与查询

use crate::{
    config::PaginationConfig,
    error::AppError,
    models::{
        usage::{
            BatchCreateUsageRequest, BatchCreateUsageResponse, CreateUsageRequest, ListUsageQuery,
            MarketState, RiskReportUsage, UsageFilter, UsageStats, UsageStatsQuery,
        },
        user::Page,
    },
    repository::usage_repo::UsageStore,
};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub const MAX_BATCH_SIZE: usize = 100;

static TICKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9.]{1,10}$").unwrap());

/// 响应时间允许超前的时钟偏差
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

pub struct UsageService {
    store: Arc<dyn UsageStore>,
    pagination: PaginationConfig,
}

impl UsageService {
    pub fn new(store: Arc<dyn UsageStore>, pagination: PaginationConfig) -> Self {
        Self { store, pagination }
    }

    pub async fn create(&self, req: CreateUsageRequest) -> Result<RiskReportUsage, AppError> {
        let now = Utc::now();
        validate_record(&req, now)?;

        let record = req.into_record(now);
        self.store.insert(&record).await?;

        tracing::debug!(
            id = %record.id,
            user_id = %record.user_id,
            ticker = %record.ticker,
            total_tokens = record.total_tokens,
            "Usage record created"
        );
        Ok(record)
    }

    /// 逐条校验，合法记录在同一事务中写入
    pub async fn batch_create(
        &self,
        req: BatchCreateUsageRequest,
    ) -> Result<BatchCreateUsageResponse, AppError> {
        if req.records.is_empty() {
            return Err(AppError::BadRequest("records must not be empty".to_string()));
        }
        if req.records.len() > MAX_BATCH_SIZE {
            return Err(AppError::BadRequest(format!(
                "at most {} records per batch",
                MAX_BATCH_SIZE
            )));
        }

        let now = Utc::now();
        let mut response = BatchCreateUsageResponse::default();
        let mut valid = Vec::with_capacity(req.records.len());

        for (i, record) in req.records.into_iter().enumerate() {
            match validate_record(&record, now) {
                Ok(()) => valid.push(record.into_record(now)),
                Err(e) => {
                    response.failure_count += 1;
                    response.errors.push(format!("record {}: {}", i, e));
                }
            }
        }

        if !valid.is_empty() {
            self.store.insert_many(&valid).await?;
        }

        response.success_count = valid.len();
        response.record_ids = valid.iter().map(|r| r.id).collect();

        tracing::info!(
            success = response.success_count,
            failure = response.failure_count,
            "Usage batch ingested"
        );
        Ok(response)
    }

    pub async fn get(&self, id: Uuid) -> Result<RiskReportUsage, AppError> {
        self.store.find_by_id(id).await?.ok_or(AppError::NotFound)
    }

    pub async fn list(&self, query: ListUsageQuery) -> Result<Page<RiskReportUsage>, AppError> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(self.pagination.default_page_size)
            .clamp(1, self.pagination.max_page_size);

        let filter = UsageFilter {
            user_id: query.user_id.filter(|s| !s.is_empty()),
            ticker: query.ticker.filter(|s| !s.is_empty()),
            start_time: parse_time("start_time", query.start_time.as_deref())?,
            end_time: parse_time("end_time", query.end_time.as_deref())?,
            limit: page_size as i64,
            offset: (page as i64 - 1) * page_size as i64,
        };

        let (items, total) = self.store.list(&filter).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    pub async fn stats(
        &self,
        user_id: &str,
        query: UsageStatsQuery,
    ) -> Result<UsageStats, AppError> {
        if user_id.is_empty() || user_id.len() > 50 {
            return Err(AppError::BadRequest("invalid user_id".to_string()));
        }

        let start = parse_time("start_time", query.start_time.as_deref())?;
        let end = parse_time("end_time", query.end_time.as_deref())?;

        self.store.stats_for_user(user_id, start, end).await
    }
}

fn validate_record(req: &CreateUsageRequest, now: DateTime<Utc>) -> Result<(), AppError> {
    req.validate()?;

    if !TICKER_RE.is_match(&req.ticker) {
        return Err(AppError::Validation(
            "ticker: must be 1-10 characters of A-Z, 0-9 or '.'".to_string(),
        ));
    }

    if req.request_time > req.response_time {
        return Err(AppError::Validation(
            "response_time: must not precede request_time".to_string(),
        ));
    }
    if req.response_time > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
        return Err(AppError::Validation(
            "response_time: must not be in the future".to_string(),
        ));
    }

    if req.prompt_tokens < 0 || req.completion_tokens < 0 || req.total_tokens < 0 {
        return Err(AppError::Validation("tokens: must not be negative".to_string()));
    }
    if req.prompt_tokens as i64 + req.completion_tokens as i64 != req.total_tokens as i64 {
        return Err(AppError::Validation(
            "total_tokens: must equal prompt_tokens + completion_tokens".to_string(),
        ));
    }

    if let Some(state) = req.market_state.as_deref().filter(|s| !s.is_empty()) {
        if MarketState::parse(state).is_none() {
            return Err(AppError::Validation(format!(
                "market_state: unknown value {}",
                state
            )));
        }
    }

    Ok(())
}

fn parse_time(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match value.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| AppError::BadRequest(format!("{} must be an RFC 3339 timestamp", field))),
    }
}
