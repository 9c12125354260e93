//! 账户服务：注册、登录、令牌刷新、修改密码，以及资料与管理操作

use crate::{
    auth::{jwt::TokenService, password::PasswordHasher},
    config::AppConfig,
    error::AppError,
    models::{
        auth::{LoginResponse, RefreshTokenResponse, RegisterRequest, TOKEN_TYPE_BEARER},
        user::{
            ListUsersQuery, NewUser, Page, Role, User, UserChanges, UserFilter, UserResponse,
            UserStatus,
        },
    },
    repository::user_repo::UserStore,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct AccountService {
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    hasher: PasswordHasher,
    config: Arc<AppConfig>,
    /// 账户不存在时也做一次哈希校验，使两条失败路径耗时相近
    dummy_hash: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
        config: Arc<AppConfig>,
    ) -> Result<Self, AppError> {
        let dummy_hash = hasher.hash(&Uuid::new_v4().to_string())?;

        Ok(Self {
            store,
            tokens,
            hasher,
            config,
            dummy_hash,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// 注册新账户
    pub async fn register(&self, req: RegisterRequest) -> Result<User, AppError> {
        PasswordHasher::validate_password_policy(&req.password, &self.config.security)?;

        if self.store.exists_by_username(&req.username).await? {
            return Err(AppError::UsernameExists);
        }
        if self.store.exists_by_email(&req.email).await? {
            return Err(AppError::EmailAlreadyUsed);
        }

        let password_hash = self.hasher.hash(&req.password)?;
        let nickname = req
            .nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| req.username.clone());

        let user = self
            .store
            .create(NewUser {
                username: req.username,
                email: req.email,
                password_hash,
                nickname,
                status: UserStatus::Active,
                role: Role::User,
            })
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// 登录，`identifier` 为用户名或邮箱
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client_ip: &str,
    ) -> Result<LoginResponse, AppError> {
        let Some(mut user) = self.store.find_by_username_or_email(identifier).await? else {
            // 与密码错误走同样的开销，并返回同一种错误
            let _ = self.hasher.verify(password, &self.dummy_hash);
            record_login("invalid_credential");
            tracing::info!(client_ip = %client_ip, "Login failed");
            return Err(AppError::InvalidCredential);
        };

        if !user.status.can_login() {
            record_login("disabled");
            tracing::info!(user_id = %user.id, "Login rejected: account disabled");
            return Err(AppError::UserDisabled);
        }

        if !self.hasher.verify(password, &user.password_hash)? {
            record_login("invalid_credential");
            tracing::info!(client_ip = %client_ip, "Login failed");
            return Err(AppError::InvalidCredential);
        }

        let pair = self.tokens.issue_token_pair(&user)?;

        let now = Utc::now();
        match self.store.update_last_login(user.id, now, client_ip).await {
            Ok(()) => {
                user.last_login_at = Some(now);
                user.last_login_ip = Some(client_ip.to_string());
            }
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to record last login");
            }
        }

        record_login("success");
        tracing::info!(user_id = %user.id, username = %user.username, "User logged in");

        Ok(LoginResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: TOKEN_TYPE_BEARER,
            expires_in: pair.expires_in,
            user: UserResponse::from(&user),
        })
    }

    /// 用刷新令牌换取新的访问令牌；刷新令牌本身不轮换
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshTokenResponse, AppError> {
        let claims = self.tokens.validate(refresh_token)?;

        if !claims.is_refresh() {
            return Err(AppError::TokenInvalid("use a refresh token".to_string()));
        }

        // 重新读取账户，拿到最新的角色与状态
        let user = self
            .store
            .find_by_id(claims.user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;

        if !user.status.can_login() {
            return Err(AppError::UserDisabled);
        }

        let access_token = self.tokens.issue_access_token(&user)?;
        tracing::debug!(user_id = %user.id, "Access token refreshed");

        Ok(RefreshTokenResponse {
            access_token,
            token_type: TOKEN_TYPE_BEARER,
            expires_in: self.tokens.access_token_ttl_secs(),
        })
    }

    /// 修改密码，需校验旧密码
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::UserNotFound)?;

        if !self.hasher.verify(old_password, &user.password_hash)? {
            tracing::info!(user_id = %user_id, "Password change rejected: old password mismatch");
            return Err(AppError::InvalidPassword);
        }

        PasswordHasher::validate_password_policy(new_password, &self.config.security)?;

        let password_hash = self.hasher.hash(new_password)?;
        if !self.store.update_password(user_id, &password_hash).await? {
            return Err(AppError::UserNotFound);
        }

        tracing::info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<User, AppError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::UserNotFound)
    }

    /// 用户自助修改资料（不含用户名、邮箱、状态、角色）
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<User, AppError> {
        let changes = UserChanges {
            username: None,
            email: None,
            status: None,
            role: None,
            ..changes
        };
        self.apply_changes(user_id, &changes).await
    }

    /// 管理员修改任意字段
    pub async fn admin_update(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<User, AppError> {
        if let Some(username) = &changes.username {
            if let Some(other) = self.store.find_by_username(username).await? {
                if other.id != user_id {
                    return Err(AppError::UsernameExists);
                }
            }
        }
        if let Some(email) = &changes.email {
            if let Some(other) = self.store.find_by_email(email).await? {
                if other.id != user_id {
                    return Err(AppError::EmailAlreadyUsed);
                }
            }
        }

        let user = self.apply_changes(user_id, &changes).await?;
        tracing::info!(
            user_id = %user_id,
            status = ?changes.status,
            role = ?changes.role,
            "User updated by admin"
        );
        Ok(user)
    }

    async fn apply_changes(&self, user_id: Uuid, changes: &UserChanges) -> Result<User, AppError> {
        if changes.is_empty() {
            return self.get_profile(user_id).await;
        }

        self.store
            .update_fields(user_id, changes)
            .await?
            .ok_or(AppError::UserNotFound)
    }

    /// 软删除
    pub async fn delete(&self, user_id: Uuid) -> Result<(), AppError> {
        if !self.store.soft_delete(user_id).await? {
            return Err(AppError::UserNotFound);
        }
        tracing::info!(user_id = %user_id, "User soft-deleted");
        Ok(())
    }

    pub async fn list(&self, query: ListUsersQuery) -> Result<Page<UserResponse>, AppError> {
        let pagination = &self.config.pagination;
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(pagination.default_page_size)
            .clamp(1, pagination.max_page_size);

        let status = query
            .status
            .map(UserStatus::try_from)
            .transpose()
            .map_err(AppError::BadRequest)?;

        let filter = UserFilter {
            username: query.username.filter(|s| !s.trim().is_empty()),
            email: query.email.filter(|s| !s.trim().is_empty()),
            status,
            role: query.role,
            sort_by: query.sort_by,
            sort_order: query.sort_order,
            limit: page_size as i64,
            offset: (page as i64 - 1) * page_size as i64,
        };

        let (users, total) = self.store.list(&filter).await?;
        let items = users.iter().map(UserResponse::from).collect();

        Ok(Page::new(items, total, page, page_size))
    }

    /// 仅当尚无任何账户时创建管理员
    pub async fn ensure_admin(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        if self.store.count().await? > 0 {
            tracing::debug!("Accounts already exist, skipping admin bootstrap");
            return Ok(None);
        }

        PasswordHasher::validate_password_policy(password, &self.config.security)?;
        let password_hash = self.hasher.hash(password)?;

        let user = self
            .store
            .create(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                nickname: username.to_string(),
                status: UserStatus::Active,
                role: Role::Admin,
            })
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "Bootstrap admin created");
        Ok(Some(user))
    }
}

fn record_login(outcome: &'static str) {
    metrics::counter!("auth_login_total", "outcome" => outcome).increment(1);
}
