//! 风险报告用量记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 市场状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketState {
    Pre,
    Regular,
    Post,
    Closed,
}

impl MarketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::Pre => "PRE",
            MarketState::Regular => "REGULAR",
            MarketState::Post => "POST",
            MarketState::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRE" => Some(MarketState::Pre),
            "REGULAR" => Some(MarketState::Regular),
            "POST" => Some(MarketState::Post),
            "CLOSED" => Some(MarketState::Closed),
            _ => None,
        }
    }
}

/// 一次报告查询的用量记录
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RiskReportUsage {
    pub id: Uuid,
    pub user_id: String,
    pub ticker: String,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub ai_response: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news_sentiment_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news_sentiment_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_signals_triggered: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_duration_ms: Option<i32>,

    pub created_at: DateTime<Utc>,
}

/// 创建用量记录请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUsageRequest {
    #[validate(length(min = 1, max = 50))]
    pub user_id: String,
    #[validate(length(min = 1, max = 10))]
    pub ticker: String,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    #[validate(length(min = 1))]
    pub ai_response: String,

    pub stock_price: Option<f64>,
    pub market_state: Option<String>,
    pub news_sentiment_score: Option<i32>,
    #[validate(length(max = 20))]
    pub news_sentiment_label: Option<String>,
    pub peak_signals_triggered: Option<i32>,
    #[validate(length(max = 50))]
    pub action_suggestion: Option<String>,
    pub rate_limit_remaining: Option<i32>,
    pub error_message: Option<String>,
    pub response_duration_ms: Option<i32>,
}

impl CreateUsageRequest {
    /// 生成待入库记录
    pub fn into_record(self, now: DateTime<Utc>) -> RiskReportUsage {
        RiskReportUsage {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            ticker: self.ticker,
            request_time: self.request_time,
            response_time: self.response_time,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            ai_response: self.ai_response,
            stock_price: self.stock_price,
            market_state: self.market_state.filter(|s| !s.is_empty()),
            news_sentiment_score: self.news_sentiment_score,
            news_sentiment_label: self.news_sentiment_label,
            peak_signals_triggered: self.peak_signals_triggered,
            action_suggestion: self.action_suggestion,
            rate_limit_remaining: self.rate_limit_remaining,
            error_message: self.error_message,
            response_duration_ms: self.response_duration_ms,
            created_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchCreateUsageRequest {
    pub records: Vec<CreateUsageRequest>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchCreateUsageResponse {
    pub success_count: usize,
    pub failure_count: usize,
    pub record_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// 列表查询参数，时间为 RFC 3339
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUsageQuery {
    pub user_id: Option<String>,
    pub ticker: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// 统计查询的时间窗口
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageStatsQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub user_id: Option<String>,
    pub ticker: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl UsageFilter {
    pub fn matches(&self, record: &RiskReportUsage) -> bool {
        self.user_id.as_ref().map_or(true, |u| &record.user_id == u)
            && self.ticker.as_ref().map_or(true, |t| &record.ticker == t)
            && self.start_time.map_or(true, |t| record.request_time >= t)
            && self.end_time.map_or(true, |t| record.request_time <= t)
    }
}

/// 单个用户的用量汇总
#[derive(Debug, Clone, Default, Serialize, PartialEq, sqlx::FromRow)]
pub struct UsageStats {
    pub total_queries: i64,
    pub total_tokens: i64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub avg_response_time_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_state_wire_format() {
        let state: MarketState = serde_json::from_str("\"REGULAR\"").unwrap();
        assert_eq!(state, MarketState::Regular);
        assert!(serde_json::from_str::<MarketState>("\"LUNCH\"").is_err());
        assert_eq!(MarketState::parse("POST"), Some(MarketState::Post));
    }
}
