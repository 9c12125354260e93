//! In-memory stores (useful for testing and local runs)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::usage::{RiskReportUsage, UsageFilter, UsageStats},
    models::user::{NewUser, SortOrder, User, UserChanges, UserFilter, UserSortField},
    repository::{usage_repo::UsageStore, user_repo::UserStore},
};

/// In-memory account store
///
/// Enforces the same uniqueness rules as the database (among non-deleted accounts).
#[derive(Default)]
pub struct MemoryUserStore {
    users: TokioMutex<HashMap<Uuid, User>>,
    fail_last_login: AtomicBool,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `update_last_login` fail, to exercise the best-effort path
    pub fn fail_last_login_updates(&self, fail: bool) {
        self.fail_last_login.store(fail, Ordering::SeqCst);
    }

    /// Raw record including soft-deleted ones
    pub async fn get_raw(&self, id: Uuid) -> Option<User> {
        self.users.lock().await.get(&id).cloned()
    }

    fn live(users: &HashMap<Uuid, User>) -> impl Iterator<Item = &User> {
        users.values().filter(|u| u.deleted_at.is_none())
    }

    fn conflict(
        users: &HashMap<Uuid, User>,
        skip: Option<Uuid>,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Option<AppError> {
        for user in Self::live(users).filter(|u| Some(u.id) != skip) {
            if username == Some(user.username.as_str()) {
                return Some(AppError::UsernameExists);
            }
            if email == Some(user.email.as_str()) {
                return Some(AppError::EmailAlreadyUsed);
            }
        }
        None
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let users = self.users.lock().await;
        Ok(users.get(&id).filter(|u| u.deleted_at.is_none()).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().await;
        let found = Self::live(&users).find(|u| u.username == username).cloned();
        Ok(found)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().await;
        let found = Self::live(&users).find(|u| u.email == email).cloned();
        Ok(found)
    }

    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().await;
        let found = Self::live(&users)
            .find(|u| u.username == identifier || u.email == identifier)
            .cloned();
        Ok(found)
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, AppError> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut users = self.users.lock().await;

        if let Some(err) = Self::conflict(
            &users,
            None,
            Some(&new_user.username),
            Some(&new_user.email),
        ) {
            return Err(err);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            nickname: new_user.nickname,
            avatar: None,
            phone: None,
            bio: None,
            gender: Default::default(),
            birthday: None,
            status: new_user.status,
            role: new_user.role,
            last_login_at: None,
            last_login_ip: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn update_fields(
        &self,
        id: Uuid,
        changes: &UserChanges,
    ) -> Result<Option<User>, AppError> {
        let mut users = self.users.lock().await;

        if let Some(err) = Self::conflict(
            &users,
            Some(id),
            changes.username.as_deref(),
            changes.email.as_deref(),
        ) {
            return Err(err);
        }

        let Some(user) = users.get_mut(&id).filter(|u| u.deleted_at.is_none()) else {
            return Ok(None);
        };
        changes.apply(user);
        user.updated_at = Utc::now();

        Ok(Some(user.clone()))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, AppError> {
        let mut users = self.users.lock().await;
        match users.get_mut(&id).filter(|u| u.deleted_at.is_none()) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: &str,
    ) -> Result<(), AppError> {
        if self.fail_last_login.load(Ordering::SeqCst) {
            return Err(AppError::Storage(sqlx::Error::PoolTimedOut));
        }

        let mut users = self.users.lock().await;
        if let Some(user) = users.get_mut(&id) {
            user.last_login_at = Some(at);
            user.last_login_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut users = self.users.lock().await;
        match users.get_mut(&id).filter(|u| u.deleted_at.is_none()) {
            Some(user) => {
                let now = Utc::now();
                user.deleted_at = Some(now);
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64), AppError> {
        let users = self.users.lock().await;

        let mut matched: Vec<User> = Self::live(&users)
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match filter.sort_by {
                UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                UserSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                UserSortField::Username => a.username.cmp(&b.username),
                UserSortField::Email => a.email.cmp(&b.email),
            };
            let ordering = match filter.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });

        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn count(&self) -> Result<i64, AppError> {
        let users = self.users.lock().await;
        Ok(Self::live(&users).count() as i64)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// In-memory usage record store
#[derive(Default)]
pub struct MemoryUsageStore {
    records: TokioMutex<Vec<RiskReportUsage>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn insert(&self, record: &RiskReportUsage) -> Result<(), AppError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn insert_many(&self, records: &[RiskReportUsage]) -> Result<(), AppError> {
        self.records.lock().await.extend_from_slice(records);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RiskReportUsage>, AppError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, filter: &UsageFilter) -> Result<(Vec<RiskReportUsage>, i64), AppError> {
        let records = self.records.lock().await;

        let mut matched: Vec<RiskReportUsage> =
            records.iter().filter(|r| filter.matches(r)).cloned().collect();
        matched.sort_by(|a, b| b.request_time.cmp(&a.request_time));

        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn stats_for_user(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<UsageStats, AppError> {
        let records = self.records.lock().await;
        let filter = UsageFilter {
            user_id: Some(user_id.to_string()),
            start_time: start,
            end_time: end,
            ..Default::default()
        };

        let mut stats = UsageStats::default();
        let mut durations = Vec::new();
        for record in records.iter().filter(|r| filter.matches(r)) {
            stats.total_queries += 1;
            stats.total_tokens += record.total_tokens as i64;
            stats.total_prompt_tokens += record.prompt_tokens as i64;
            stats.total_completion_tokens += record.completion_tokens as i64;
            if let Some(ms) = record.response_duration_ms {
                durations.push(ms as i64);
            }
        }
        if !durations.is_empty() {
            stats.avg_response_time_ms = durations.iter().sum::<i64>() / durations.len() as i64;
        }

        Ok(stats)
    }
}
