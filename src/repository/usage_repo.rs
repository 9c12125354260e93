//! 风险报告用量记录存储

use crate::{
    error::AppError,
    models::usage::{RiskReportUsage, UsageFilter, UsageStats},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert(&self, record: &RiskReportUsage) -> Result<(), AppError>;
    /// 单个事务内写入
    async fn insert_many(&self, records: &[RiskReportUsage]) -> Result<(), AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<RiskReportUsage>, AppError>;
    /// 按 request_time 倒序
    async fn list(&self, filter: &UsageFilter) -> Result<(Vec<RiskReportUsage>, i64), AppError>;
    async fn stats_for_user(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<UsageStats, AppError>;
}

const INSERT_SQL: &str = r#"
    INSERT INTO risk_report_usage (
        id, user_id, ticker, request_time, response_time,
        prompt_tokens, completion_tokens, total_tokens, ai_response,
        stock_price, market_state, news_sentiment_score, news_sentiment_label,
        peak_signals_triggered, action_suggestion, rate_limit_remaining,
        error_message, response_duration_ms, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
"#;

pub struct PgUsageStore {
    db: PgPool,
}

impl PgUsageStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn insert_query(
        record: &RiskReportUsage,
    ) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
        sqlx::query(INSERT_SQL)
            .bind(record.id)
            .bind(&record.user_id)
            .bind(&record.ticker)
            .bind(record.request_time)
            .bind(record.response_time)
            .bind(record.prompt_tokens)
            .bind(record.completion_tokens)
            .bind(record.total_tokens)
            .bind(&record.ai_response)
            .bind(record.stock_price)
            .bind(&record.market_state)
            .bind(record.news_sentiment_score)
            .bind(&record.news_sentiment_label)
            .bind(record.peak_signals_triggered)
            .bind(&record.action_suggestion)
            .bind(record.rate_limit_remaining)
            .bind(&record.error_message)
            .bind(record.response_duration_ms)
            .bind(record.created_at)
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &UsageFilter) {
        builder.push(" WHERE TRUE");
        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(ticker) = &filter.ticker {
            builder.push(" AND ticker = ").push_bind(ticker.clone());
        }
        if let Some(start) = filter.start_time {
            builder.push(" AND request_time >= ").push_bind(start);
        }
        if let Some(end) = filter.end_time {
            builder.push(" AND request_time <= ").push_bind(end);
        }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn insert(&self, record: &RiskReportUsage) -> Result<(), AppError> {
        Self::insert_query(record).execute(&self.db).await?;
        Ok(())
    }

    async fn insert_many(&self, records: &[RiskReportUsage]) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;
        for record in records {
            Self::insert_query(record).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RiskReportUsage>, AppError> {
        let record =
            sqlx::query_as::<_, RiskReportUsage>("SELECT * FROM risk_report_usage WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        Ok(record)
    }

    async fn list(&self, filter: &UsageFilter) -> Result<(Vec<RiskReportUsage>, i64), AppError> {
        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM risk_report_usage");
        Self::push_filters(&mut count_query, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM risk_report_usage");
        Self::push_filters(&mut query, filter);
        query.push(" ORDER BY request_time DESC");
        query.push(" LIMIT ").push_bind(filter.limit);
        query.push(" OFFSET ").push_bind(filter.offset);

        let records = query
            .build_query_as::<RiskReportUsage>()
            .fetch_all(&self.db)
            .await?;

        Ok((records, total))
    }

    async fn stats_for_user(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<UsageStats, AppError> {
        let stats = sqlx::query_as::<_, UsageStats>(
            r#"
            SELECT
                COUNT(*) AS total_queries,
                COALESCE(SUM(total_tokens), 0)::BIGINT AS total_tokens,
                COALESCE(SUM(prompt_tokens), 0)::BIGINT AS total_prompt_tokens,
                COALESCE(SUM(completion_tokens), 0)::BIGINT AS total_completion_tokens,
                COALESCE(AVG(response_duration_ms), 0)::BIGINT AS avg_response_time_ms
            FROM risk_report_usage
            WHERE user_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR request_time >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR request_time <= $3)
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;

        Ok(stats)
    }
}
