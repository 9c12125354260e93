//! 账户存储：能力接口与 PostgreSQL 实现

use crate::{
    db,
    error::AppError,
    models::user::{NewUser, User, UserChanges, UserFilter},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// 账户存储能力
///
/// 所有查询都排除已软删除的记录；未找到返回 `None`，存储故障返回 `AppError::Storage`。
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    /// 登录时按用户名或邮箱查找
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError>;
    async fn exists_by_username(&self, username: &str) -> Result<bool, AppError>;
    async fn exists_by_email(&self, email: &str) -> Result<bool, AppError>;

    /// 唯一约束冲突映射为 `UsernameExists` / `EmailAlreadyUsed`
    async fn create(&self, user: NewUser) -> Result<User, AppError>;
    async fn update_fields(
        &self,
        id: Uuid,
        changes: &UserChanges,
    ) -> Result<Option<User>, AppError>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, AppError>;
    async fn update_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: &str,
    ) -> Result<(), AppError>;
    async fn soft_delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64), AppError>;
    async fn count(&self) -> Result<i64, AppError>;

    /// 就绪检查
    async fn ping(&self) -> Result<(), AppError>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, nickname, avatar, phone, bio, \
     gender, birthday, status, role, last_login_at, last_login_ip, \
     created_at, updated_at, deleted_at";

/// 唯一索引冲突 → 业务错误
fn map_unique_violation(err: sqlx::Error) -> AppError {
    match db::unique_violation(&err) {
        Some(constraint) if constraint.contains("username") => AppError::UsernameExists,
        Some(constraint) if constraint.contains("email") => AppError::EmailAlreadyUsed,
        _ => AppError::Storage(err),
    }
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, condition: &str, value: &str) -> Result<Option<User>, AppError> {
        let sql = format!(
            "SELECT {} FROM users WHERE {} AND deleted_at IS NULL",
            USER_COLUMNS, condition
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
        builder.push(" WHERE deleted_at IS NULL");
        if let Some(username) = &filter.username {
            builder
                .push(" AND username ILIKE ")
                .push_bind(format!("%{}%", username));
        }
        if let Some(email) = &filter.email {
            builder.push(" AND email ILIKE ").push_bind(format!("%{}%", email));
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_i16());
        }
        if let Some(role) = filter.role {
            builder.push(" AND role = ").push_bind(role.as_str());
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.find_one("username = $1", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_one("email = $1", email).await
    }

    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError> {
        self.find_one("(username = $1 OR email = $1)", identifier).await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND deleted_at IS NULL)",
        )
        .bind(username)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND deleted_at IS NULL)",
        )
        .bind(email)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn create(&self, user: NewUser) -> Result<User, AppError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, nickname, status, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.nickname)
            .bind(user.status.as_i16())
            .bind(user.role.as_str())
            .fetch_one(&self.db)
            .await
            .map_err(map_unique_violation)
    }

    async fn update_fields(
        &self,
        id: Uuid,
        changes: &UserChanges,
    ) -> Result<Option<User>, AppError> {
        let sql = format!(
            r#"
            UPDATE users
            SET
                username = COALESCE($2, username),
                email = COALESCE($3, email),
                nickname = COALESCE($4, nickname),
                avatar = COALESCE($5, avatar),
                phone = COALESCE($6, phone),
                bio = COALESCE($7, bio),
                gender = COALESCE($8, gender),
                birthday = COALESCE($9, birthday),
                status = COALESCE($10, status),
                role = COALESCE($11, role),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(&changes.username)
            .bind(&changes.email)
            .bind(&changes.nickname)
            .bind(&changes.avatar)
            .bind(&changes.phone)
            .bind(&changes.bio)
            .bind(changes.gender.map(|g| g.as_i16()))
            .bind(changes.birthday)
            .bind(changes.status.map(|s| s.as_i16()))
            .bind(changes.role.map(|r| r.as_str()))
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique_violation)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        ip: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET last_login_at = $2, last_login_ip = $3 WHERE id = $1")
            .bind(id)
            .bind(at)
            .bind(ip)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64), AppError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        Self::push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.db)
            .await?;

        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM users", USER_COLUMNS));
        Self::push_filters(&mut query, filter);
        // 排序字段来自白名单枚举
        query.push(format!(
            " ORDER BY {} {}, id ASC",
            filter.sort_by.column(),
            filter.sort_order.keyword()
        ));
        query.push(" LIMIT ").push_bind(filter.limit);
        query.push(" OFFSET ").push_bind(filter.offset);

        let users = query.build_query_as::<User>().fetch_all(&self.db).await?;

        Ok((users, total))
    }

    async fn count(&self) -> Result<i64, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .fetch_one(&self.db)
            .await?;

        Ok(total)
    }

    async fn ping(&self) -> Result<(), AppError> {
        db::record_pool_metrics(&self.db);
        match db::health_check(&self.db).await {
            db::HealthStatus::Healthy { .. } => Ok(()),
            db::HealthStatus::Unhealthy(msg) => Err(AppError::Internal(msg)),
        }
    }
}
